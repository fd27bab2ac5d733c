//! The message catalog: typed request/response kinds built on top of
//! the generic PackStream `Structure`.

use crate::error::{BoltError, Result};
use crate::packstream::{self, StructSig, Structure, Value};

/// Credentials sent in `Init`'s auth token.
#[derive(Debug, Clone)]
pub enum AuthToken {
    /// No authentication (`{scheme: "none"}`).
    None,
    /// Basic auth (`{scheme: "basic", principal, credentials}`).
    Basic {
        /// Username.
        principal: String,
        /// Password.
        credentials: String,
    },
}

impl AuthToken {
    fn into_map(self) -> Vec<(String, Value)> {
        match self {
            AuthToken::None => vec![("scheme".to_string(), Value::string("none"))],
            AuthToken::Basic {
                principal,
                credentials,
            } => vec![
                ("scheme".to_string(), Value::string("basic")),
                ("principal".to_string(), Value::String(principal)),
                ("credentials".to_string(), Value::String(credentials)),
            ],
        }
    }
}

/// A request message the client may send.
#[derive(Debug, Clone)]
pub enum Request {
    /// `Init(clientName, authToken)`.
    Init {
        /// Identifies this driver/version to the server.
        client_name: String,
        /// Auth token; either `none` or `basic`.
        auth: AuthToken,
    },
    /// `Run(statement, parameters)`.
    Run {
        /// The statement text (Cypher or transaction control: `BEGIN`,
        /// `COMMIT`, `ROLLBACK`).
        statement: String,
        /// Named parameters; always a map, possibly empty.
        parameters: Vec<(String, Value)>,
    },
    /// `PullAll()` — stream all remaining records.
    PullAll,
    /// `DiscardAll()` — discard all remaining records.
    DiscardAll,
    /// `AckFailure()` — clear a `Failed` connection without a Reset.
    AckFailure,
    /// `Reset()` — forcibly return a connection to `Ready`.
    Reset,
}

impl Request {
    fn to_structure(&self) -> Structure {
        match self {
            Request::Init { client_name, auth } => Structure::new(
                StructSig::Init,
                vec![
                    Value::String(client_name.clone()),
                    Value::Map(auth.clone().into_map()),
                ],
            ),
            Request::Run {
                statement,
                parameters,
            } => Structure::new(
                StructSig::Run,
                vec![
                    Value::String(statement.clone()),
                    Value::Map(parameters.clone()),
                ],
            ),
            Request::PullAll => Structure::new(StructSig::PullAll, vec![]),
            Request::DiscardAll => Structure::new(StructSig::DiscardAll, vec![]),
            Request::AckFailure => Structure::new(StructSig::AckFailure, vec![]),
            Request::Reset => Structure::new(StructSig::Reset, vec![]),
        }
    }

    /// Encode this request as a standalone PackStream message (not yet
    /// chunked; see `chunk::ChunkWriter`).
    pub fn encode(&self) -> Result<Vec<u8>> {
        packstream::encode_to_vec(&Value::Structure(self.to_structure()))
    }

    /// A `Run("BEGIN", {})` message. Transactions are expressed as plain
    /// statements; there is no dedicated transaction wire message.
    pub fn begin() -> Self {
        Request::Run {
            statement: "BEGIN".to_string(),
            parameters: vec![],
        }
    }

    /// A `Run("COMMIT", {})` message.
    pub fn commit() -> Self {
        Request::Run {
            statement: "COMMIT".to_string(),
            parameters: vec![],
        }
    }

    /// A `Run("ROLLBACK", {})` message.
    pub fn rollback() -> Self {
        Request::Run {
            statement: "ROLLBACK".to_string(),
            parameters: vec![],
        }
    }
}

/// A response message the server may send.
#[derive(Debug, Clone)]
pub enum Response {
    /// `Success(meta)`.
    Success(Vec<(String, Value)>),
    /// `Record(fields)`.
    Record(Vec<Value>),
    /// `Failure(meta)`, carrying `code` and `message`.
    Failure(Vec<(String, Value)>),
    /// `Ignored()` — a pipelined request skipped because an earlier one failed.
    Ignored,
}

impl Response {
    /// Parse a decoded top-level `Value` (already read, unchunked, and
    /// PackStream-decoded) into a typed response.
    pub fn from_value(value: Value) -> Result<Self> {
        let structure = match value {
            Value::Structure(s) => s,
            other => {
                return Err(BoltError::protocol(format!(
                    "expected a response structure, got {other:?}"
                )))
            }
        };
        match structure.signature {
            StructSig::Success => Ok(Response::Success(expect_single_map(structure.fields)?)),
            StructSig::Record => Ok(Response::Record(expect_single_list(structure.fields)?)),
            StructSig::Failure => Ok(Response::Failure(expect_single_map(structure.fields)?)),
            StructSig::Ignored => Ok(Response::Ignored),
            other => Err(BoltError::protocol(format!(
                "{other:?} is not a valid response signature"
            ))),
        }
    }

    /// The `code`/`message` pair from a `Failure`'s metadata, if this is one.
    pub fn failure_detail(&self) -> Option<(String, String)> {
        match self {
            Response::Failure(meta) => {
                let code = meta_str(meta, "code").unwrap_or("Neo.DatabaseError.General.UnknownError");
                let message = meta_str(meta, "message").unwrap_or("(no message)");
                Some((code.to_string(), message.to_string()))
            }
            _ => None,
        }
    }
}

fn meta_str<'a>(meta: &'a [(String, Value)], key: &str) -> Option<&'a str> {
    meta.iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.as_str())
}

fn expect_single_map(mut fields: Vec<Value>) -> Result<Vec<(String, Value)>> {
    if fields.len() != 1 {
        return Err(BoltError::protocol(format!(
            "expected exactly one map field, got {}",
            fields.len()
        )));
    }
    match fields.remove(0) {
        Value::Map(m) => Ok(m),
        other => Err(BoltError::protocol(format!("expected a map field, got {other:?}"))),
    }
}

fn expect_single_list(mut fields: Vec<Value>) -> Result<Vec<Value>> {
    if fields.len() != 1 {
        return Err(BoltError::protocol(format!(
            "expected exactly one list field, got {}",
            fields.len()
        )));
    }
    match fields.remove(0) {
        Value::List(l) => Ok(l),
        other => Err(BoltError::protocol(format!("expected a list field, got {other:?}"))),
    }
}

/// Derive "rows affected" from terminal `Success` stats: the sum of
/// the four create/delete count deltas. `properties-set` is deliberately
/// excluded; see DESIGN.md for why.
pub fn rows_affected(stats: &[(String, Value)]) -> i64 {
    const KEYS: [&str; 4] = [
        "nodes-created",
        "nodes-deleted",
        "relationships-created",
        "relationships-deleted",
    ];
    KEYS.iter()
        .filter_map(|k| stats.iter().find(|(key, _)| key == k))
        .filter_map(|(_, v)| v.as_int())
        .sum()
}
