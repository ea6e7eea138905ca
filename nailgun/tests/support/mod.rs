// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{
    env, io,
    io::{Read, Write},
    net::TcpStream,
    path::PathBuf,
    process::{Child, Command, Stdio},
    time,
};

use anyhow::{anyhow, Context};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub fn cargo_dir() -> PathBuf {
    env::var_os("CARGO_BIN_PATH")
        .map(PathBuf::from)
        .or_else(|| {
            env::current_exe().ok().map(|mut path| {
                path.pop();
                if path.ends_with("deps") {
                    path.pop();
                }
                path
            })
        })
        .unwrap_or_else(|| panic!("CARGO_BIN_PATH wasn't set. Cannot continue running test"))
}

pub fn nailgun_bin() -> PathBuf {
    cargo_dir().join("nailgun")
}

/// A handle for a `nailgun serve` subprocess bound to a scratch port on
/// loopback. Kills the subprocess when it goes out of scope.
pub struct DaemonProc {
    proc: Child,
    pub addr: String,
}

impl DaemonProc {
    pub fn new() -> anyhow::Result<DaemonProc> {
        Self::with_config(None)
    }

    /// Like `new`, but optionally passes `--config-file <path>` so a
    /// test can override things like `heartbeat_timeout_ms`.
    pub fn with_config(config_file: Option<&std::path::Path>) -> anyhow::Result<DaemonProc> {
        let port = scratch_port();
        let addr = format!("127.0.0.1:{port}");

        let mut cmd = Command::new(nailgun_bin());
        cmd.arg("serve").arg("--bind-addr").arg(&addr);
        if let Some(config_file) = config_file {
            cmd.arg("--config-file").arg(config_file);
        }
        let proc = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn().context("spawning nailgun serve")?;

        let mut sleep_dur = time::Duration::from_millis(5);
        let mut connected = false;
        for _ in 0..12 {
            if TcpStream::connect(&addr).is_ok() {
                connected = true;
                break;
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }
        if !connected {
            return Err(anyhow!("daemon never started listening on {}", addr));
        }

        Ok(DaemonProc { proc, addr })
    }

    pub fn connect(&self) -> anyhow::Result<WireClient> {
        Ok(WireClient { stream: TcpStream::connect(&self.addr).context("connecting to daemon")? })
    }
}

impl Drop for DaemonProc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing daemon proc: {:?}", e);
        }
        let _ = self.proc.wait();
    }
}

fn scratch_port() -> u16 {
    // bind to an ephemeral port ourselves, then hand the number to the
    // daemon: good enough for test isolation without a shared registry
    // of ports across test binaries.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("binding scratch listener");
    listener.local_addr().unwrap().port()
}

/// A bare-bones implementation of the client side of the wire protocol,
/// used to drive sessions directly without a separate client binary.
pub struct WireClient {
    stream: TcpStream,
}

pub struct SessionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: i32,
}

impl WireClient {
    /// Writes the full header (args, env, cwd, command), then runs the
    /// session to completion feeding `stdin` followed immediately by
    /// EOF, collecting stdout/stderr/exit status.
    pub fn run(
        &mut self,
        command: &str,
        args: &[&str],
        env: &[(&str, &str)],
        cwd: Option<&str>,
        stdin: &[u8],
    ) -> anyhow::Result<SessionResult> {
        self.write_header(command, args, env, cwd)?;
        if !stdin.is_empty() {
            self.write_stdin(stdin)?;
        }
        self.write_stdin_eof()?;
        self.read_to_completion()
    }

    /// Writes just the header chunks (args, env, cwd, command), leaving
    /// the stdin phase to the caller so it can be interleaved with
    /// heartbeats or pauses.
    pub fn write_header(&mut self, command: &str, args: &[&str], env: &[(&str, &str)], cwd: Option<&str>) -> anyhow::Result<()> {
        for a in args {
            self.write_chunk(b'A', a.as_bytes())?;
        }
        for (k, v) in env {
            self.write_chunk(b'E', format!("{k}={v}").as_bytes())?;
        }
        if let Some(cwd) = cwd {
            self.write_chunk(b'D', cwd.as_bytes())?;
        }
        self.write_chunk(b'C', command.as_bytes())?;
        Ok(())
    }

    pub fn write_stdin(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.write_chunk(b'0', data)
    }

    pub fn write_stdin_eof(&mut self) -> anyhow::Result<()> {
        self.write_chunk(b'.', &[])
    }

    pub fn write_heartbeat(&mut self) -> anyhow::Result<()> {
        self.write_chunk(b'H', &[])
    }

    /// Reads stdout/stderr/exit chunks until the session closes,
    /// either with an exit status or with the connection dropping
    /// (e.g. because the server timed out the session).
    pub fn read_to_completion(&mut self) -> anyhow::Result<SessionResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            let (kind, payload) = self.read_chunk()?;
            match kind {
                b'1' => stdout.extend(payload),
                b'2' => stderr.extend(payload),
                b'X' => {
                    let text = String::from_utf8(payload).context("exit chunk wasn't utf8")?;
                    let status: i32 = text.trim().parse().context("exit chunk wasn't an integer")?;
                    return Ok(SessionResult { stdout, stderr, status });
                }
                other => return Err(anyhow!("unexpected chunk kind {:?} from server", other as char)),
            }
        }
    }

    fn write_chunk(&mut self, kind: u8, payload: &[u8]) -> anyhow::Result<()> {
        self.stream.write_u32::<BigEndian>(payload.len() as u32)?;
        self.stream.write_all(&[kind])?;
        self.stream.write_all(payload)?;
        Ok(())
    }

    fn read_chunk(&mut self) -> anyhow::Result<(u8, Vec<u8>)> {
        let len = self.stream.read_u32::<BigEndian>()? as usize;
        let mut kind = [0u8; 1];
        self.stream.read_exact(&mut kind)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok((kind[0], payload))
    }
}

impl Read for WireClient {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
