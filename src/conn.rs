//! The connection state machine: handshake/version negotiation,
//! authentication, statement execution (single and pipelined), and failure
//! recovery.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use log::{debug, warn};

use crate::chunk::{self, ChunkWriter};
use crate::config::ConnectInfo;
use crate::error::{BoltError, Result};
use crate::message::{AuthToken, Request, Response};
use crate::packstream::{self, Value};

/// The 4-byte magic preamble that opens every Bolt session.
const HANDSHAKE_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Supported protocol version (this driver speaks Bolt v1 only).
const SUPPORTED_VERSION: u32 = 1;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Socket open, handshake/init not yet performed.
    Fresh,
    /// Ready to accept a new Run.
    Ready,
    /// A result stream is open; records may still be pending.
    Streaming,
    /// The server reported a Failure; needs AckFailure or Reset.
    Failed,
    /// A cancellation/timeout interrupted an in-flight stream; needs Reset.
    Interrupted,
    /// The transport has been shut down; unusable.
    Closed,
}

/// The plain-TCP-or-TLS byte stream a `Connection` reads and writes.
enum Transport {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

impl Transport {
    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.shutdown(std::net::Shutdown::Both),
            Transport::Tls(s) => s.shutdown(),
        }
    }

    fn set_read_timeout(&mut self, d: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.set_read_timeout(d),
            Transport::Tls(s) => s.get_ref().set_read_timeout(d),
        }
    }

    fn set_write_timeout(&mut self, d: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.set_write_timeout(d),
            Transport::Tls(s) => s.get_ref().set_write_timeout(d),
        }
    }
}

/// One statement queued for `Connection::pipeline`.
#[derive(Debug, Clone)]
pub struct PipelinedStatement {
    /// Statement text.
    pub statement: String,
    /// Named parameters.
    pub parameters: Vec<(String, Value)>,
    /// `true` to `PullAll` (stream rows back), `false` to `DiscardAll`.
    pub pull: bool,
}

impl PipelinedStatement {
    /// Build a statement that streams its rows back.
    pub fn pull<S: Into<String>>(statement: S, parameters: Vec<(String, Value)>) -> Self {
        PipelinedStatement {
            statement: statement.into(),
            parameters,
            pull: true,
        }
    }

    /// Build a fire-and-forget statement.
    pub fn discard<S: Into<String>>(statement: S, parameters: Vec<(String, Value)>) -> Self {
        PipelinedStatement {
            statement: statement.into(),
            parameters,
            pull: false,
        }
    }
}

/// Result of one statement from `Connection::pipeline`.
#[derive(Debug, Clone)]
pub enum StatementResult {
    /// The statement ran and (if `pull` was set) all of its records were
    /// collected inline.
    Done {
        /// Metadata from the Run's Success (e.g. `fields`).
        run_meta: Vec<(String, Value)>,
        /// Rows, present only when the statement pulled.
        records: Vec<Vec<Value>>,
        /// Terminal Success metadata (e.g. `type`, `stats`).
        terminal_meta: Vec<(String, Value)>,
    },
    /// The server returned `Failure` for this statement.
    Failed {
        /// Server error code.
        code: String,
        /// Server error message.
        message: String,
    },
    /// The server `Ignored` this statement because an earlier one in the
    /// same pipeline failed.
    Ignored,
}

/// A live Bolt connection: one TCP/TLS socket, its negotiated version, and
/// FSM state.
pub struct Connection {
    transport: Transport,
    chunk_writer: ChunkWriter,
    version: u32,
    state: State,
    last_meta: Option<Vec<(String, Value)>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("version", &self.version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial, negotiate the handshake, and authenticate against `info`,
    /// returning a `Ready` connection.
    pub fn connect(info: &ConnectInfo, client_name: &str) -> Result<Self> {
        let tcp = dial(info)?;
        tcp.set_nodelay(true).ok();

        let transport = if info.tls {
            Transport::Tls(Box::new(connect_tls(info, tcp)?))
        } else {
            Transport::Plain(tcp)
        };

        let mut conn = Connection {
            transport,
            chunk_writer: ChunkWriter::default(),
            version: 0,
            state: State::Fresh,
            last_meta: None,
        };

        conn.handshake()?;
        conn.init(client_name, &info.user, &info.password)?;
        Ok(conn)
    }

    /// Wrap an already-connected, already-handshaken-and-authenticated
    /// transport. Exposed for tests that drive the FSM over an in-process
    /// loopback pair or a `recorder::Replay`.
    #[doc(hidden)]
    pub fn from_parts_for_test(stream: TcpStream, version: u32) -> Self {
        Connection {
            transport: Transport::Plain(stream),
            chunk_writer: ChunkWriter::default(),
            version,
            state: State::Ready,
            last_meta: None,
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Negotiated protocol version (always 1 for this driver).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Set the chunk size used for future outbound messages.
    pub fn set_chunk_size(&mut self, chunk_size: usize) -> Result<()> {
        self.chunk_writer = ChunkWriter::with_chunk_size(chunk_size)?;
        Ok(())
    }

    /// Set the read deadline for future operations.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.transport.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Set the write deadline for future operations.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.transport.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Terminal metadata from the last completed stream (e.g. `{type: "r",
    /// stats: {...}}`), if any.
    pub fn last_meta(&self) -> Option<&[(String, Value)]> {
        self.last_meta.as_deref()
    }

    fn handshake(&mut self) -> Result<()> {
        let mut proposal = Vec::with_capacity(20);
        proposal.extend_from_slice(&HANDSHAKE_MAGIC);
        proposal.write_u32::<BE>(SUPPORTED_VERSION)?;
        proposal.write_u32::<BE>(0)?;
        proposal.write_u32::<BE>(0)?;
        proposal.write_u32::<BE>(0)?;
        self.transport.write_all(&proposal)?;
        self.transport.flush()?;

        let version = self.transport.read_u32::<BE>().map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                BoltError::transport("connection closed during handshake")
            } else {
                BoltError::from(e)
            }
        })?;
        if version == 0 {
            return Err(BoltError::protocol(
                "server rejected all proposed versions (UnsupportedVersion)",
            ));
        }
        debug!(target: "bolt::conn", "negotiated protocol version {version}");
        self.version = version;
        Ok(())
    }

    fn init(&mut self, client_name: &str, user: &Option<String>, password: &Option<String>) -> Result<()> {
        let auth = match (user, password) {
            (Some(u), Some(p)) => AuthToken::Basic {
                principal: u.clone(),
                credentials: p.clone(),
            },
            _ => AuthToken::None,
        };
        let response = self.send_recv(&Request::Init {
            client_name: client_name.to_string(),
            auth,
        })?;
        match response {
            Response::Success(_) => {
                self.state = State::Ready;
                debug!(target: "bolt::conn", "initialized, connection Ready");
                Ok(())
            }
            Response::Failure(meta) => {
                let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                warn!(target: "bolt::conn", "INIT failed: {code}");
                Err(BoltError::Auth { code, message })
            }
            other => Err(BoltError::protocol(format!("unexpected response to INIT: {other:?}"))),
        }
    }

    /// Write one request's framed message; does not flush.
    fn send(&mut self, request: &Request) -> Result<()> {
        let payload = request.encode()?;
        self.chunk_writer.write_message(&mut self.transport, &payload)
    }

    /// Flush any buffered writes to the wire.
    fn flush(&mut self) -> Result<()> {
        self.transport.flush()?;
        Ok(())
    }

    /// Read and decode one response message.
    fn recv(&mut self) -> Result<Response> {
        let payload = chunk::read_message(&mut self.transport)?;
        let mut cursor = io::Cursor::new(payload);
        let value = packstream::decode(&mut cursor)?;
        Response::from_value(value)
    }

    fn send_recv(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        self.flush()?;
        self.recv()
    }

    /// Run one statement. `pull` selects
    /// `PullAll` (stream rows) vs `DiscardAll` (fire-and-forget).
    ///
    /// On success the connection enters `Streaming` when `pull` is set;
    /// callers then drive `next_record` until it returns `Ok(None)`. When
    /// `pull` is false the whole exchange (Run + DiscardAll + both
    /// responses) completes here and the connection returns to `Ready`.
    pub fn run(&mut self, statement: &str, parameters: Vec<(String, Value)>, pull: bool) -> Result<Vec<(String, Value)>> {
        if self.state != State::Ready {
            return Err(BoltError::usage(format!(
                "run() requires a Ready connection, was {:?}",
                self.state
            )));
        }
        self.send(&Request::Run {
            statement: statement.to_string(),
            parameters,
        })?;
        self.send(if pull { &Request::PullAll } else { &Request::DiscardAll })?;
        self.flush()?;

        let run_meta = match self.recv()? {
            Response::Success(meta) => meta,
            Response::Failure(meta) => {
                self.state = State::Failed;
                self.recv()?; // the paired Pull/Discard response is Ignored
                let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                return Err(BoltError::Server { code, message });
            }
            other => {
                self.state = State::Failed;
                return Err(BoltError::protocol(format!("unexpected response to RUN: {other:?}")));
            }
        };

        if pull {
            self.state = State::Streaming;
        } else {
            match self.recv()? {
                Response::Success(terminal) => {
                    self.last_meta = Some(terminal);
                    self.state = State::Ready;
                }
                Response::Failure(meta) => {
                    self.state = State::Failed;
                    let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                    return Err(BoltError::Server { code, message });
                }
                other => {
                    self.state = State::Failed;
                    return Err(BoltError::protocol(format!("unexpected response to DISCARD_ALL: {other:?}")));
                }
            }
        }
        Ok(run_meta)
    }

    /// Pull the next record from an open stream (`state() == Streaming`).
    /// Returns `Ok(None)` once the terminal `Success` has been consumed,
    /// after which `state()` is `Ready` and `last_meta()` holds the
    /// terminal metadata.
    pub fn next_record(&mut self) -> Result<Option<Vec<Value>>> {
        if self.state != State::Streaming {
            return Err(BoltError::usage(format!(
                "next_record() requires a Streaming connection, was {:?}",
                self.state
            )));
        }
        match self.recv()? {
            Response::Record(fields) => Ok(Some(fields)),
            Response::Success(meta) => {
                self.last_meta = Some(meta);
                self.state = State::Ready;
                Ok(None)
            }
            Response::Failure(meta) => {
                self.state = State::Failed;
                let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                Err(BoltError::Server { code, message })
            }
            other => Err(BoltError::protocol(format!("unexpected response mid-stream: {other:?}"))),
        }
    }

    /// Drain any remaining records of an open stream without returning
    /// them, leaving the connection `Ready` (or `Failed`, if the stream
    /// ends in Failure).
    pub fn drain(&mut self) -> Result<()> {
        while self.next_record()?.is_some() {}
        Ok(())
    }

    /// Write N statements' Run+Pull/Discard pairs before reading any
    /// response. Once a statement Fails, all later statements come back
    /// `Ignored`.
    pub fn pipeline(&mut self, statements: &[PipelinedStatement]) -> Result<Vec<StatementResult>> {
        if self.state != State::Ready {
            return Err(BoltError::usage(format!(
                "pipeline() requires a Ready connection, was {:?}",
                self.state
            )));
        }
        for s in statements {
            self.send(&Request::Run {
                statement: s.statement.clone(),
                parameters: s.parameters.clone(),
            })?;
            self.send(if s.pull { &Request::PullAll } else { &Request::DiscardAll })?;
        }
        self.flush()?;

        let mut results = Vec::with_capacity(statements.len());
        let mut failed = false;
        for s in statements {
            if failed {
                let _ = self.recv()?;
                let _ = self.recv()?;
                results.push(StatementResult::Ignored);
                continue;
            }
            match self.recv()? {
                Response::Success(run_meta) => {
                    if s.pull {
                        let mut records = Vec::new();
                        loop {
                            match self.recv()? {
                                Response::Record(fields) => records.push(fields),
                                Response::Success(terminal_meta) => {
                                    results.push(StatementResult::Done {
                                        run_meta: run_meta.clone(),
                                        records,
                                        terminal_meta,
                                    });
                                    break;
                                }
                                Response::Failure(meta) => {
                                    failed = true;
                                    let (code, message) =
                                        Response::Failure(meta).failure_detail().unwrap();
                                    results.push(StatementResult::Failed { code, message });
                                    break;
                                }
                                Response::Ignored => {
                                    self.state = State::Failed;
                                    return Err(BoltError::protocol("unexpected Ignored mid-stream"));
                                }
                            }
                        }
                    } else {
                        match self.recv()? {
                            Response::Success(terminal_meta) => {
                                results.push(StatementResult::Done {
                                    run_meta,
                                    records: vec![],
                                    terminal_meta,
                                });
                            }
                            Response::Failure(meta) => {
                                failed = true;
                                let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                                results.push(StatementResult::Failed { code, message });
                            }
                            other => {
                                self.state = State::Failed;
                                return Err(BoltError::protocol(format!(
                                    "unexpected response to DISCARD_ALL: {other:?}"
                                )));
                            }
                        }
                    }
                }
                Response::Failure(meta) => {
                    failed = true;
                    let _ignored = self.recv()?; // paired Pull/Discard response
                    let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                    results.push(StatementResult::Failed { code, message });
                }
                other => {
                    self.state = State::Failed;
                    return Err(BoltError::protocol(format!("unexpected response to RUN: {other:?}")));
                }
            }
        }
        self.state = if failed { State::Failed } else { State::Ready };
        Ok(results)
    }

    /// Clear a `Failed` connection without disturbing the active
    /// transaction.
    pub fn ack_failure(&mut self) -> Result<()> {
        if self.state != State::Failed {
            return Err(BoltError::usage(format!(
                "ack_failure() requires a Failed connection, was {:?}",
                self.state
            )));
        }
        match self.send_recv(&Request::AckFailure)? {
            Response::Success(_) => {
                self.state = State::Ready;
                Ok(())
            }
            Response::Failure(meta) => {
                let (code, message) = Response::Failure(meta).failure_detail().unwrap();
                Err(BoltError::Server { code, message })
            }
            other => Err(BoltError::protocol(format!("unexpected response to ACK_FAILURE: {other:?}"))),
        }
    }

    /// Forcibly interrupt any in-flight processing and return to `Ready`.
    /// Valid from any state except `Closed`. Any `Record`/`Ignored`
    /// messages already in flight from an interrupted stream are drained
    /// and discarded until Reset's own terminal `Success` arrives.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Err(BoltError::usage("reset() on a closed connection"));
        }
        self.send(&Request::Reset)?;
        self.flush()?;
        loop {
            match self.recv()? {
                Response::Success(_) => {
                    self.state = State::Ready;
                    return Ok(());
                }
                Response::Record(_) | Response::Ignored => continue,
                other => {
                    self.state = State::Failed;
                    return Err(BoltError::protocol(format!("unexpected response to RESET: {other:?}")));
                }
            }
        }
    }

    /// Shut down the transport. Idempotent.
    pub fn close(&mut self) {
        if self.state != State::Closed {
            let _ = self.transport.shutdown();
            self.state = State::Closed;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn dial(info: &ConnectInfo) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let addrs = (info.host.as_str(), info.port)
        .to_socket_addrs()
        .map_err(|e| BoltError::transport(format!("resolving {}:{}: {e}", info.host, info.port)))?;
    let mut last_err = None;
    for addr in addrs {
        let result = match info.dial_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match result {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(BoltError::transport(format!(
        "could not connect to {}:{}: {}",
        info.host,
        info.port,
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "no addresses".to_string())
    )))
}

fn connect_tls(info: &ConnectInfo, tcp: TcpStream) -> Result<native_tls::TlsStream<TcpStream>> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(info.tls_no_verify);

    if let Some(ca_path) = &info.tls_ca_cert_file {
        let pem = std::fs::read(ca_path)
            .map_err(|e| BoltError::config(format!("reading tls_ca_cert_file {ca_path}: {e}")))?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| BoltError::config(format!("parsing tls_ca_cert_file {ca_path}: {e}")))?;
        builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&info.tls_cert_file, &info.tls_key_file) {
        let cert_pem = std::fs::read(cert_path)
            .map_err(|e| BoltError::config(format!("reading tls_cert_file {cert_path}: {e}")))?;
        let key_pem = std::fs::read(key_path)
            .map_err(|e| BoltError::config(format!("reading tls_key_file {key_path}: {e}")))?;
        let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)
            .map_err(|e| BoltError::config(format!("building client identity: {e}")))?;
        builder.identity(identity);
    }

    let connector = builder
        .build()
        .map_err(|e| BoltError::transport(format!("building TLS connector: {e}")))?;
    connector
        .connect(&info.host, tcp)
        .map_err(|e| BoltError::transport(format!("TLS handshake failed: {e}")))
}
