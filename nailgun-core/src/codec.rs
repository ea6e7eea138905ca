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

//! The wire codec: reads and writes the length-prefixed, typed chunks
//! that make up the nailgun protocol. This is the only place that
//! knows about the `4-byte length | 1-byte tag | payload` framing.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt as _, WriteBytesExt as _};
use nailgun_protocol::{Chunk, ChunkKind};

use crate::{consts, error::NailgunError};

/// Reads chunks off of an underlying byte stream, rejecting any chunk
/// whose payload exceeds the configured cap for its kind.
pub struct ChunkReader<R> {
    inner: R,
    max_header_chunk: usize,
    max_stdin_chunk: usize,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        ChunkReader {
            inner,
            max_header_chunk: consts::DEFAULT_MAX_HEADER_CHUNK,
            max_stdin_chunk: consts::DEFAULT_MAX_STDIN_CHUNK,
        }
    }

    pub fn with_limits(mut self, max_header_chunk: usize, max_stdin_chunk: usize) -> Self {
        self.max_header_chunk = max_header_chunk;
        self.max_stdin_chunk = max_stdin_chunk;
        self
    }

    /// Read one chunk: a 4-byte big-endian length, a 1-byte tag, then
    /// that many payload bytes. A short read anywhere in this sequence
    /// is a wire error, not a clean EOF, since a chunk boundary is the
    /// only place a peer is allowed to hang up.
    pub fn read_chunk(&mut self) -> anyhow::Result<Chunk> {
        let len = self
            .inner
            .read_u32::<BigEndian>()
            .map_err(|e| NailgunError::Wire(format!("reading chunk length: {e}")))?;

        let tag = self.inner.read_u8().map_err(|e| NailgunError::Wire(format!("reading chunk tag: {e}")))?;
        let kind = ChunkKind::try_from(tag).map_err(|e| NailgunError::Wire(e.to_string()))?;

        let cap = if kind.is_stdin() { self.max_stdin_chunk } else { self.max_header_chunk };
        if len as usize > cap {
            return Err(NailgunError::Wire(format!(
                "chunk of kind {:?} has length {} exceeding cap {}",
                kind, len, cap
            ))
            .into());
        }

        let mut payload = vec![0u8; len as usize];
        self.inner
            .read_exact(&mut payload)
            .map_err(|e| NailgunError::Wire(format!("reading chunk payload: {e}")))?;

        Ok(Chunk::new(kind, payload))
    }
}

/// Writes chunks to an underlying byte stream. Writes are not flushed
/// automatically except for `X` chunks, which always flush: the exit
/// chunk is the last thing a client will ever see on this connection,
/// so it must make it out even if nothing triggers a later flush.
pub struct ChunkWriter<W> {
    inner: W,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W) -> Self {
        ChunkWriter { inner }
    }

    pub fn write_chunk(&mut self, chunk: &Chunk) -> io::Result<()> {
        self.inner.write_u32::<BigEndian>(chunk.payload.len() as u32)?;
        self.inner.write_u8(chunk.kind as u8)?;
        self.inner.write_all(&chunk.payload)?;
        if chunk.kind == ChunkKind::Exit {
            self.inner.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
