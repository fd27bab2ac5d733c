//! Session recorder (test aid — not part of the core contract).
//!
//! Wraps a connection's raw byte stream with a tee that records each
//! read/write as an event; the counterpart `Replay` reader feeds a scripted
//! byte sequence back and asserts that what the driver writes matches what
//! was recorded, so integration tests can run without a live server.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// One recorded read or write against the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// The raw bytes read or written.
    #[serde(with = "bytes_as_hex")]
    pub bytes: Vec<u8>,
    /// `true` if this was a write (client -> server), `false` for a read.
    pub is_write: bool,
    /// Whether the operation completed successfully.
    pub completed: bool,
    /// Error message, if `completed` is false.
    pub error: Option<String>,
}

mod bytes_as_hex {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        hex_encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex_decode(&s).map_err(serde::de::Error::custom)
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
        if s.len() % 2 != 0 {
            return Err("odd-length hex string".to_string());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
            .collect()
    }
}

/// A session recording: the ordered sequence of events observed on one
/// connection, serializable to JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    /// Ordered events.
    pub events: Vec<Event>,
}

/// Wraps an underlying stream and records every read/write into a
/// `Recording`. Reads and writes themselves are passed through unchanged.
pub struct Recorder<IO> {
    inner: IO,
    recording: Recording,
}

impl<IO> Recorder<IO> {
    /// Wrap `inner`, starting with an empty recording.
    pub fn new(inner: IO) -> Self {
        Recorder {
            inner,
            recording: Recording::default(),
        }
    }

    /// Consume the recorder, returning what it recorded.
    pub fn into_recording(self) -> Recording {
        self.recording
    }
}

impl<IO: Read> Read for Recorder<IO> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.recording.events.push(Event {
                    bytes: buf[..n].to_vec(),
                    is_write: false,
                    completed: true,
                    error: None,
                });
                Ok(n)
            }
            Err(e) => {
                self.recording.events.push(Event {
                    bytes: vec![],
                    is_write: false,
                    completed: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }
}

impl<IO: Write> Write for Recorder<IO> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => {
                self.recording.events.push(Event {
                    bytes: buf[..n].to_vec(),
                    is_write: true,
                    completed: true,
                    error: None,
                });
                Ok(n)
            }
            Err(e) => {
                self.recording.events.push(Event {
                    bytes: vec![],
                    is_write: true,
                    completed: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Replays a scripted `Recording` back: writes are checked against the next
/// expected write event (mismatches fail loudly), reads are served from the
/// next expected read event's bytes.
pub struct Replay {
    events: std::collections::VecDeque<Event>,
}

impl Replay {
    /// Build a replay source from a previously captured recording.
    pub fn new(recording: Recording) -> Self {
        Replay {
            events: recording.events.into(),
        }
    }
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let event = self
            .events
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "replay exhausted"))?;
        if event.is_write {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "replay expected a read but next event is a write",
            ));
        }
        let n = event.bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&event.bytes[..n]);
        Ok(n)
    }
}

impl Write for Replay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let event = self
            .events
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "replay exhausted"))?;
        if !event.is_write {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "replay expected a write but next event is a read",
            ));
        }
        if event.bytes != buf {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "replay write does not match scripted bytes",
            ));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
