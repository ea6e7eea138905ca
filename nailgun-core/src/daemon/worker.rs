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

//! A session worker owns one accepted connection end to end: it
//! decodes the header, resolves a nail, multiplexes stdio while the
//! nail runs, and writes the final exit chunk. This is the body that
//! runs on each pool thread between a `take` and a `give`.

use std::{collections::HashMap, net::TcpStream, sync::Arc};

use nailgun_protocol::{Chunk, ChunkKind, NailId};
use tracing::{info, instrument, warn};

use crate::{
    codec::ChunkReader,
    consts,
    nail::{self, Nail, NailContext, Outcome},
    registry::NailRegistry,
    router::{self, SessionIo},
    stream::{spawn_stdin_reader, ChunkedInput, ChunkedOutputs},
};

/// The decoded `A*/E*/D?/C` prefix of a session.
#[derive(Debug)]
struct Header {
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    command: String,
}

#[instrument(skip_all, fields(peer = tracing::field::Empty))]
pub fn serve(conn: TcpStream, registry: Arc<dyn NailRegistry>) -> anyhow::Result<()> {
    let peer = conn.peer_addr().ok();
    tracing::Span::current().record("peer", tracing::field::debug(&peer));
    conn.set_nodelay(true).ok();

    let read_half = conn.try_clone()?;
    let write_half = conn;

    let mut header_reader = ChunkReader::new(read_half);
    let header = decode_header(&mut header_reader)?;

    info!(command = %header.command, "dispatching session");

    let nail_id = resolve_nail_id(registry.as_ref(), &header.command);
    let nail = nail_id.as_ref().and_then(|id| registry.lookup(id));

    let outputs = ChunkedOutputs::new(write_half);

    let (nail_id, nail) = match (nail_id, nail) {
        (Some(id), Some(nail)) => (id, nail),
        _ => {
            warn!(command = %header.command, "no such command");
            outputs.write_exit(consts::NO_SUCH_COMMAND_STATUS)?;
            return Ok(());
        }
    };

    let stdin = spawn_stdin_reader(header_reader).with_timeout(registry.heartbeat_timeout());

    registry.nail_started(&nail_id);
    let status = run_nail(nail, stdin, &outputs, header, nail_id.clone(), peer, Arc::clone(&registry));
    registry.nail_finished(&nail_id);

    outputs.write_exit(status)?;
    Ok(())
}

fn resolve_nail_id(registry: &dyn NailRegistry, command: &str) -> Option<NailId> {
    if command.is_empty() {
        return registry.default_nail();
    }
    registry
        .resolve_alias(command)
        .or_else(|| if registry.allows_raw_identifiers() { Some(NailId::from(command)) } else { None })
}

#[allow(clippy::too_many_arguments)]
fn run_nail(
    nail: Nail,
    mut stdin: ChunkedInput,
    outputs: &ChunkedOutputs<TcpStream>,
    header: Header,
    nail_id: NailId,
    peer: Option<std::net::SocketAddr>,
    registry: Arc<dyn NailRegistry>,
) -> i32 {
    let outcome = match nail {
        Nail::Static(f) => {
            router::install(SessionIo {
                stdin: Box::new(stdin),
                stdout: Box::new(outputs.stdout()),
                stderr: Box::new(outputs.stderr()),
            });
            let outcome = nail::invoke_static(f, header.args);
            router::uninstall();
            outcome
        }
        Nail::Contextual(f) => {
            let mut stdout = outputs.stdout();
            let mut stderr = outputs.stderr();
            let mut ctx = NailContext {
                args: header.args,
                env: header.env,
                cwd: header.cwd.map(std::path::PathBuf::from),
                command: nail_id,
                peer,
                stdin: &mut stdin,
                stdout: &mut stdout,
                stderr: &mut stderr,
                registry,
            };
            nail::invoke_contextual(f, &mut ctx)
        }
    };

    match outcome {
        Outcome::Returned(status) => status,
        Outcome::Exited(status) => status,
        Outcome::Failed(msg) => {
            warn!("nail failed: {}", msg);
            consts::EXCEPTION_STATUS
        }
    }
}

fn decode_header<R: std::io::Read>(reader: &mut ChunkReader<R>) -> anyhow::Result<Header> {
    let mut args = Vec::new();
    let mut env = HashMap::new();
    let mut cwd = None;
    loop {
        let chunk = reader.read_chunk()?;
        match chunk.kind {
            ChunkKind::Argument => args.push(decode_utf8(chunk)?),
            ChunkKind::Environment => {
                let pair = decode_utf8(chunk)?;
                match pair.split_once('=') {
                    Some((k, v)) => {
                        env.insert(k.to_string(), v.to_string());
                    }
                    None => warn!("ignoring malformed environment chunk {:?}", pair),
                }
            }
            ChunkKind::WorkingDir => {
                if cwd.is_some() {
                    warn!("duplicate working directory chunk, keeping the latest one");
                }
                cwd = Some(decode_utf8(chunk)?);
            }
            ChunkKind::Command => {
                let command = decode_utf8(chunk)?;
                return Ok(Header { args, env, cwd, command });
            }
            other => {
                warn!("ignoring unexpected chunk of kind {:?} before the command chunk", other);
            }
        }
    }
}

fn decode_utf8(chunk: Chunk) -> anyhow::Result<String> {
    String::from_utf8(chunk.payload)
        .map_err(|e| crate::error::NailgunError::Protocol(format!("header chunk is not valid utf-8: {e}")).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        codec::ChunkWriter,
        registry::StaticRegistry,
    };
    use std::io::Cursor;

    fn write_header(args: &[&str], env: &[(&str, &str)], cwd: Option<&str>, command: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = ChunkWriter::new(&mut buf);
        for a in args {
            w.write_chunk(&Chunk::new(ChunkKind::Argument, a.as_bytes().to_vec())).unwrap();
        }
        for (k, v) in env {
            w.write_chunk(&Chunk::new(ChunkKind::Environment, format!("{k}={v}").into_bytes())).unwrap();
        }
        if let Some(cwd) = cwd {
            w.write_chunk(&Chunk::new(ChunkKind::WorkingDir, cwd.as_bytes().to_vec())).unwrap();
        }
        w.write_chunk(&Chunk::new(ChunkKind::Command, command.as_bytes().to_vec())).unwrap();
        buf
    }

    #[test]
    fn decodes_a_full_header() {
        let buf = write_header(&["a", "b"], &[("K", "V")], Some("/tmp"), "tools.Echo");
        let header = decode_header(&mut ChunkReader::new(Cursor::new(buf))).unwrap();
        assert_eq!(header.args, vec!["a", "b"]);
        assert_eq!(header.env.get("K"), Some(&"V".to_string()));
        assert_eq!(header.cwd.as_deref(), Some("/tmp"));
        assert_eq!(header.command, "tools.Echo");
    }

    #[test]
    fn malformed_environment_chunk_is_ignored_not_fatal() {
        let mut buf = Vec::new();
        let mut w = ChunkWriter::new(&mut buf);
        w.write_chunk(&Chunk::new(ChunkKind::Environment, b"NOEQUALSIGN".to_vec())).unwrap();
        w.write_chunk(&Chunk::new(ChunkKind::Command, b"x".to_vec())).unwrap();
        let header = decode_header(&mut ChunkReader::new(Cursor::new(buf))).unwrap();
        assert!(header.env.is_empty());
    }

    #[test]
    fn stdin_or_output_chunk_before_command_is_logged_and_ignored() {
        let mut buf = Vec::new();
        let mut w = ChunkWriter::new(&mut buf);
        w.write_chunk(&Chunk::new(ChunkKind::Stdin, vec![])).unwrap();
        w.write_chunk(&Chunk::new(ChunkKind::Command, b"x".to_vec())).unwrap();
        let header = decode_header(&mut ChunkReader::new(Cursor::new(buf))).unwrap();
        assert_eq!(header.command, "x");
    }

    #[test]
    fn resolves_default_nail_for_empty_command() {
        let mut reg = StaticRegistry::new();
        reg.register("tools.Default", Nail::Static(|_| 0));
        let reg = reg.with_default_nail(Some(NailId::from("tools.Default")));
        assert_eq!(resolve_nail_id(&reg, ""), Some(NailId::from("tools.Default")));
    }

    #[test]
    fn falls_back_to_raw_identifier_when_no_alias_matches() {
        let reg = StaticRegistry::new();
        assert_eq!(resolve_nail_id(&reg, "tools.Echo"), Some(NailId::from("tools.Echo")));
    }
}
