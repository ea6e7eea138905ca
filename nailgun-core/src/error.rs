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

//! Typed errors for the parts of the engine that aren't just shuttling
//! an opaque nail error along. Nail-side failures stay as
//! `anyhow::Error`, since nails are arbitrary code we don't control,
//! but wire framing, header parsing, and registry misses get their own
//! variants so callers can match on them instead of grepping a
//! message string.

use std::fmt;

#[derive(Debug)]
pub enum NailgunError {
    /// The connection produced bytes that don't parse as a chunk:
    /// a short read, an unknown tag, or a chunk over the configured
    /// size cap.
    Wire(String),

    /// The header (the `A`/`E`/`D`/`C` prefix) was malformed in a way
    /// that isn't just a bad individual chunk, e.g. a second `D`.
    Protocol(String),

    /// No nail could be resolved for the requested command.
    NoSuchCommand(String),

    /// The peer went quiet for longer than the heartbeat timeout, or
    /// reset the connection outright.
    ClientDisconnect(String),
}

impl fmt::Display for NailgunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NailgunError::Wire(msg) => write!(f, "wire error: {msg}"),
            NailgunError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            NailgunError::NoSuchCommand(cmd) => write!(f, "no such command: {cmd}"),
            NailgunError::ClientDisconnect(msg) => write!(f, "client disconnected: {msg}"),
        }
    }
}

impl std::error::Error for NailgunError {}
