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

//! Gives a [`Nail::Static`](crate::nail::Nail::Static) handler, which
//! only gets an argument vector, the illusion that it owns the
//! process's standard streams. The worker installs a session's stdio
//! here before invoking the handler and uninstalls it immediately
//! after, so routing is scoped to exactly the lifetime of one
//! invocation on one thread.
//!
//! There is no portable way to intercept `std::io::stdin`/`stdout` in
//! stable Rust, so this is an opt-in facility: handlers that want
//! routed stdio call [`stdin`]/[`stdout`]/[`stderr`] instead of the
//! stdlib equivalents. `Contextual` nails don't need this at all —
//! they get their streams directly through `NailContext`.

use std::{
    cell::RefCell,
    io::{self, Read, Write},
};

/// A session's stdio, boxed so the router doesn't need to know the
/// concrete stream types the worker is using.
pub struct SessionIo {
    pub stdin: Box<dyn Read + Send>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

thread_local! {
    // Keyed implicitly by thread identity: each worker thread gets its
    // own slot, so there is no way for one session's routing to leak
    // into another's.
    static CURRENT: RefCell<Option<SessionIo>> = const { RefCell::new(None) };
}

/// Installs `io` as the current thread's session stdio. Panics if
/// stdio is already installed on this thread, since that would mean a
/// worker forgot to uninstall after a previous session.
pub fn install(io: SessionIo) {
    CURRENT.with(|c| {
        let mut slot = c.borrow_mut();
        assert!(slot.is_none(), "stdio router: install called while already installed");
        *slot = Some(io);
    });
}

/// Removes and returns the current thread's session stdio, if any.
pub fn uninstall() -> Option<SessionIo> {
    CURRENT.with(|c| c.borrow_mut().take())
}

/// Reads from the current thread's routed stdin, falling back to the
/// process's real stdin if nothing is installed.
pub fn read_stdin(buf: &mut [u8]) -> io::Result<usize> {
    CURRENT.with(|c| match c.borrow_mut().as_mut() {
        Some(io) => io.stdin.read(buf),
        None => io::stdin().read(buf),
    })
}

/// Writes to the current thread's routed stdout, falling back to the
/// process's real stdout if nothing is installed.
pub fn write_stdout(buf: &[u8]) -> io::Result<usize> {
    CURRENT.with(|c| match c.borrow_mut().as_mut() {
        Some(io) => io.stdout.write(buf),
        None => io::stdout().write(buf),
    })
}

/// Writes to the current thread's routed stderr, falling back to the
/// process's real stderr if nothing is installed.
pub fn write_stderr(buf: &[u8]) -> io::Result<usize> {
    CURRENT.with(|c| match c.borrow_mut().as_mut() {
        Some(io) => io.stderr.write(buf),
        None => io::stderr().write(buf),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    struct VecWriter(Vec<u8>);
    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn routes_to_installed_stdio_and_back_to_default() {
        install(SessionIo {
            stdin: Box::new(Cursor::new(b"hi".to_vec())),
            stdout: Box::new(VecWriter(Vec::new())),
            stderr: Box::new(VecWriter(Vec::new())),
        });

        let mut buf = [0u8; 2];
        assert_eq!(read_stdin(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");

        let io = uninstall();
        assert!(io.is_some());
        assert!(uninstall().is_none());
    }

    #[test]
    #[should_panic(expected = "already installed")]
    fn double_install_panics() {
        install(SessionIo {
            stdin: Box::new(Cursor::new(Vec::new())),
            stdout: Box::new(VecWriter(Vec::new())),
            stderr: Box::new(VecWriter(Vec::new())),
        });
        install(SessionIo {
            stdin: Box::new(Cursor::new(Vec::new())),
            stdout: Box::new(VecWriter(Vec::new())),
            stderr: Box::new(VecWriter(Vec::new())),
        });
        uninstall();
    }
}
