// Copyright 2024 Nailgun contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Nail handlers, the context they run with, and the exit sentinel
//! that lets a handler end its session the way `std::process::exit`
//! would end a whole process.

use std::{
    any::Any,
    collections::HashMap,
    io::{Read, Write},
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

pub use nailgun_protocol::NailId;

use crate::registry::NailRegistry;

/// A registered command implementation. Tagged by shape rather than
/// discovered by reflection: a `NailId` resolves to exactly one of
/// these.
#[derive(Clone, Copy)]
pub enum Nail {
    /// The simple shape: takes the argument vector, returns an exit
    /// status. No access to stdio routing, environment, or cwd beyond
    /// what the thread-local router makes available.
    Static(fn(Vec<String>) -> i32),

    /// The full shape: gets a [`NailContext`] with routed stdio,
    /// environment, cwd, and peer information, and can fail with an
    /// `anyhow::Error` in addition to returning a status.
    Contextual(fn(&mut NailContext) -> anyhow::Result<i32>),
}

/// Everything a `Contextual` nail needs to do its job. Built fresh for
/// every session by the worker; never reused across invocations.
pub struct NailContext<'a> {
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub command: NailId,
    pub peer: Option<SocketAddr>,
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    pub registry: Arc<dyn NailRegistry>,
}

impl<'a> NailContext<'a> {
    /// Ends the session with `status` without returning control to the
    /// worker's normal `Ok(status)` path. Equivalent in spirit to
    /// `std::process::exit`, but scoped to this session instead of the
    /// whole daemon: it unwinds the stack via a dedicated panic
    /// payload that the worker recognizes and translates back into an
    /// exit status, rather than actually terminating the process.
    pub fn exit(&self, status: i32) -> ! {
        exit(status)
    }
}

/// Free-standing equivalent of [`NailContext::exit`], usable from a
/// [`Nail::Static`] handler that has no context to call a method on.
pub fn exit(status: i32) -> ! {
    panic::panic_any(ExitSignal(status))
}

/// The panic payload `exit` unwinds with. Kept private to the crate:
/// nails are not meant to construct or match on this themselves, only
/// to trigger it via [`exit`]/[`NailContext::exit`].
struct ExitSignal(i32);

/// What happened when a nail ran to completion, one way or another.
#[derive(Debug)]
pub enum Outcome {
    /// The handler returned normally (including a non-zero status).
    Returned(i32),
    /// The handler called [`exit`]/[`NailContext::exit`].
    Exited(i32),
    /// The handler panicked for any other reason, or returned `Err`.
    /// Carries a human-readable description for logging.
    Failed(String),
}

/// Runs a [`Nail::Static`] handler, catching both ordinary panics and
/// the exit sentinel.
pub fn invoke_static(f: fn(Vec<String>) -> i32, args: Vec<String>) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(status) => Outcome::Returned(status),
        Err(payload) => classify_panic(payload),
    }
}

/// Runs a [`Nail::Contextual`] handler, catching both ordinary panics
/// and the exit sentinel, and folding a returned `Err` into the same
/// "failed" bucket a panic would land in.
pub fn invoke_contextual(f: fn(&mut NailContext) -> anyhow::Result<i32>, ctx: &mut NailContext) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(Ok(status)) => Outcome::Returned(status),
        Ok(Err(e)) => Outcome::Failed(format!("{e:?}")),
        Err(payload) => classify_panic(payload),
    }
}

fn classify_panic(payload: Box<dyn Any + Send>) -> Outcome {
    match payload.downcast::<ExitSignal>() {
        Ok(signal) => Outcome::Exited(signal.0),
        Err(payload) => Outcome::Failed(panic_message(&*payload)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "nail panicked with a non-string payload".to_string()
    }
}
