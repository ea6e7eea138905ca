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

//! The wire protocol shared between a nailgun client and the session
//! daemon: chunk framing, chunk kinds, and the handful of constants that
//! both sides need to agree on.

use std::{fmt, time::Duration};

use anyhow::anyhow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of milliseconds a session will tolerate with no
/// client→server bytes (including heartbeats) before treating the
/// client as disconnected.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default cap on a single header chunk (`A`/`E`/`D`/`C`).
pub const DEFAULT_MAX_HEADER_CHUNK: usize = 64 * 1024;

/// Default cap on a single stdin chunk (`0`).
pub const DEFAULT_MAX_STDIN_CHUNK: usize = 2 * 1024 * 1024;

/// Exit status written when a nail raises an uncaught error or panics.
pub const EXCEPTION_STATUS: i32 = 1;

/// Exit status written when the requested command has no registered nail.
pub const NO_SUCH_COMMAND_STATUS: i32 = 1;

/// A resolved, fully qualified nail identifier, as distinguished from the
/// short alias a client may have sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NailId(pub String);

impl fmt::Display for NailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NailId {
    fn from(s: &str) -> Self {
        NailId(s.to_string())
    }
}

impl From<String> for NailId {
    fn from(s: String) -> Self {
        NailId(s)
    }
}

/// ChunkKind is the one-byte tag that precedes every chunk on the wire.
///
/// The byte values are part of the wire contract: they are the literal
/// ASCII codes called out in the protocol description, not an
/// implementation detail we are free to renumber.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkKind {
    /// `A` — one argument (client→server, pre-dispatch).
    Argument = b'A',
    /// `E` — one `KEY=VALUE` environment pair (client→server, pre-dispatch).
    Environment = b'E',
    /// `D` — the working directory (client→server, pre-dispatch).
    WorkingDir = b'D',
    /// `C` — the command name; receiving this ends the header.
    Command = b'C',
    /// `0` — raw stdin bytes (client→server, post-dispatch).
    Stdin = b'0',
    /// `.` — zero-length stdin EOF marker (client→server).
    StdinEof = b'.',
    /// `H` — zero-length keepalive while stdin is open (client→server).
    Heartbeat = b'H',
    /// `1` — raw stdout bytes (server→client).
    Stdout = b'1',
    /// `2` — raw stderr bytes (server→client).
    Stderr = b'2',
    /// `X` — ASCII decimal exit status terminated by `\n` (server→client, last chunk).
    Exit = b'X',
}

impl ChunkKind {
    pub fn is_header(self) -> bool {
        matches!(
            self,
            ChunkKind::Argument | ChunkKind::Environment | ChunkKind::WorkingDir | ChunkKind::Command
        )
    }

    pub fn is_stdin(self) -> bool {
        matches!(self, ChunkKind::Stdin | ChunkKind::StdinEof | ChunkKind::Heartbeat)
    }

    pub fn is_output(self) -> bool {
        matches!(self, ChunkKind::Stdout | ChunkKind::Stderr | ChunkKind::Exit)
    }
}

impl TryFrom<u8> for ChunkKind {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> anyhow::Result<Self> {
        match v {
            b'A' => Ok(ChunkKind::Argument),
            b'E' => Ok(ChunkKind::Environment),
            b'D' => Ok(ChunkKind::WorkingDir),
            b'C' => Ok(ChunkKind::Command),
            b'0' => Ok(ChunkKind::Stdin),
            b'.' => Ok(ChunkKind::StdinEof),
            b'H' => Ok(ChunkKind::Heartbeat),
            b'1' => Ok(ChunkKind::Stdout),
            b'2' => Ok(ChunkKind::Stderr),
            b'X' => Ok(ChunkKind::Exit),
            other => Err(anyhow!("unknown chunk tag {:?}", other as char)),
        }
    }
}

/// An owned chunk of data read off (or about to be written to) the wire.
///
/// format:
///
/// ```text
/// 4 bytes: big endian unsigned length prefix
/// 1 byte: kind tag
/// N bytes: payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn new(kind: ChunkKind, payload: Vec<u8>) -> Self {
        Chunk { kind, payload }
    }

    pub fn empty(kind: ChunkKind) -> Self {
        Chunk { kind, payload: Vec::new() }
    }
}
