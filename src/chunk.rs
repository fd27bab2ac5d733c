//! Chunked message framing.
//!
//! The chunker is oblivious to PackStream: it slices an already-encoded
//! message into `len:u16_be` + payload chunks, terminated by a zero-length
//! chunk, and reassembles the reverse way on read. A chunk size of zero is
//! rejected at construction; the protocol default is `0xFFFF`.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};

use crate::error::{BoltError, Result};

/// Default chunk size used by the protocol and this driver. Callers that
/// need a smaller chunk size can build a `ChunkWriter` explicitly.
pub const DEFAULT_CHUNK_SIZE: usize = 0xFFFF;

/// Splits an encoded message into length-prefixed chunks and writes them,
/// followed by the zero-length terminator.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    chunk_size: usize,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        ChunkWriter {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkWriter {
    /// Build a writer with an explicit chunk size (must be >= 1).
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(BoltError::usage("chunk size must be >= 1"));
        }
        Ok(ChunkWriter { chunk_size })
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Frame `payload` as one or more chunks, terminated by `0x00 0x00`, and
    /// write it to `out`. Does not flush `out`; callers typically flush once
    /// after one or more messages have been written.
    pub fn write_message<W: Write>(&self, out: &mut W, payload: &[u8]) -> Result<()> {
        for chunk in payload.chunks(self.chunk_size) {
            out.write_u16::<BE>(chunk.len() as u16)?;
            out.write_all(chunk)?;
        }
        out.write_u16::<BE>(0)?;
        Ok(())
    }
}

/// Read one complete chunked message from `input`, reassembling chunks until
/// the zero-length terminator, and return the concatenated payload.
///
/// An EOF encountered mid-message (the terminator never arrives) is reported
/// as `BoltError::Transport` rather than a bare I/O error, since it means the
/// peer is gone, not that this one message was malformed.
pub fn read_message<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    loop {
        let len = match input.read_u16::<BE>() {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if payload.is_empty() {
                    // Clean EOF between messages (peer closed the socket);
                    // let the caller see this as a transport error too, since
                    // the FSM always expects a response.
                    return Err(BoltError::transport("connection closed before a message arrived"));
                }
                return Err(BoltError::transport("truncated message: EOF before terminator"));
            }
            Err(e) => return Err(BoltError::from(e)),
        };
        if len == 0 {
            return Ok(payload);
        }
        let start = payload.len();
        payload.resize(start + len as usize, 0);
        input.read_exact(&mut payload[start..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                BoltError::transport("truncated message: EOF mid-chunk")
            } else {
                BoltError::from(e)
            }
        })?;
    }
}
