//! A minimal in-process Bolt server used to script protocol exchanges for
//! integration tests, without depending on a live Neo4j instance.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use bolt_driver::chunk::{self, ChunkWriter};
use bolt_driver::packstream::{self, StructSig, Structure, Value};

/// Bind a loopback listener on an OS-assigned port.
pub fn bind_loopback() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Server side of the handshake: read the 20-byte client proposal (ignored)
/// and reply with `version`.
pub fn server_handshake(stream: &mut TcpStream, version: u32) -> io::Result<()> {
    let mut proposal = [0u8; 20];
    stream.read_exact(&mut proposal)?;
    stream.write_all(&version.to_be_bytes())?;
    stream.flush()
}

/// Server side of `INIT`: read and discard the framed request, then reply
/// `Success({})`.
pub fn server_init_success(stream: &mut TcpStream) -> io::Result<()> {
    let _init = chunk::read_message(stream).map_err(to_io_error)?;
    write_structure(stream, StructSig::Success, vec![Value::Map(vec![])])
}

/// Write one PackStream structure as a single framed message.
pub fn write_structure(stream: &mut TcpStream, sig: StructSig, fields: Vec<Value>) -> io::Result<()> {
    let payload = packstream::encode_to_vec(&Value::Structure(Structure::new(sig, fields)))
        .map_err(to_io_error)?;
    ChunkWriter::default()
        .write_message(stream, &payload)
        .map_err(to_io_error)?;
    stream.flush()
}

/// Read and decode one framed client message as a generic `Value`.
pub fn read_value(stream: &mut TcpStream) -> io::Result<Value> {
    let payload = chunk::read_message(stream).map_err(to_io_error)?;
    let mut cursor = io::Cursor::new(payload);
    packstream::decode(&mut cursor).map_err(to_io_error)
}

fn to_io_error(e: bolt_driver::BoltError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}
