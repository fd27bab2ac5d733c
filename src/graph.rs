//! Value adapters: the graph-entity structures PackStream can carry,
//! decoded from a generic `Structure` into named, typed records.

use crate::error::{BoltError, Result};
use crate::packstream::{StructSig, Structure, Value};

/// `Node(id, labels, properties)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Server-assigned node id.
    pub id: i64,
    /// Labels attached to the node.
    pub labels: Vec<String>,
    /// Node properties.
    pub properties: Vec<(String, Value)>,
}

/// `Relationship(id, startId, endId, type, properties)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Id of the start node.
    pub start_id: i64,
    /// Id of the end node.
    pub end_id: i64,
    /// Relationship type name.
    pub rel_type: String,
    /// Relationship properties.
    pub properties: Vec<(String, Value)>,
}

/// `UnboundRelationship(id, type, properties)` — a relationship without its
/// endpoints, as carried inside a `Path`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Relationship type name.
    pub rel_type: String,
    /// Relationship properties.
    pub properties: Vec<(String, Value)>,
}

/// `Path(nodes, relationships, sequence)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Nodes visited along the path.
    pub nodes: Vec<Node>,
    /// Unbound relationships traversed along the path.
    pub relationships: Vec<UnboundRelationship>,
    /// Alternating 1-based indices into `relationships`/`nodes` describing
    /// the walk; see the Bolt spec for the exact indexing convention.
    pub sequence: Vec<i64>,
}

fn expect_structure(value: Value, expected: StructSig, arity: usize) -> Result<Vec<Value>> {
    let Structure { signature, fields } = match value {
        Value::Structure(s) => s,
        other => {
            return Err(BoltError::protocol(format!(
                "expected {expected:?} structure, got {other:?}"
            )))
        }
    };
    if signature != expected {
        return Err(BoltError::protocol(format!(
            "expected {expected:?} structure, got {signature:?}"
        )));
    }
    if fields.len() != arity {
        return Err(BoltError::protocol(format!(
            "{expected:?} expects {arity} fields, got {}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn as_int(value: Value, what: &str) -> Result<i64> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(BoltError::protocol(format!("{what} must be an integer, got {other:?}"))),
    }
}

fn as_string(value: Value, what: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BoltError::protocol(format!("{what} must be a string, got {other:?}"))),
    }
}

fn as_map(value: Value, what: &str) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Map(m) => Ok(m),
        other => Err(BoltError::protocol(format!("{what} must be a map, got {other:?}"))),
    }
}

fn as_string_list(value: Value, what: &str) -> Result<Vec<String>> {
    match value {
        Value::List(items) => items
            .into_iter()
            .map(|item| as_string(item, what))
            .collect(),
        other => Err(BoltError::protocol(format!("{what} must be a list, got {other:?}"))),
    }
}

fn as_int_list(value: Value, what: &str) -> Result<Vec<i64>> {
    match value {
        Value::List(items) => items.into_iter().map(|item| as_int(item, what)).collect(),
        other => Err(BoltError::protocol(format!("{what} must be a list, got {other:?}"))),
    }
}

impl Node {
    /// Decode a `Node` from its wire structure.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_structure(value, StructSig::Node, 3)?.into_iter();
        let id = as_int(fields.next().unwrap(), "Node.id")?;
        let labels = as_string_list(fields.next().unwrap(), "Node.labels")?;
        let properties = as_map(fields.next().unwrap(), "Node.properties")?;
        Ok(Node { id, labels, properties })
    }
}

impl Relationship {
    /// Decode a `Relationship` from its wire structure.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_structure(value, StructSig::Relationship, 5)?.into_iter();
        let id = as_int(fields.next().unwrap(), "Relationship.id")?;
        let start_id = as_int(fields.next().unwrap(), "Relationship.startId")?;
        let end_id = as_int(fields.next().unwrap(), "Relationship.endId")?;
        let rel_type = as_string(fields.next().unwrap(), "Relationship.type")?;
        let properties = as_map(fields.next().unwrap(), "Relationship.properties")?;
        Ok(Relationship {
            id,
            start_id,
            end_id,
            rel_type,
            properties,
        })
    }
}

impl UnboundRelationship {
    /// Decode an `UnboundRelationship` from its wire structure.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_structure(value, StructSig::UnboundRelationship, 3)?.into_iter();
        let id = as_int(fields.next().unwrap(), "UnboundRelationship.id")?;
        let rel_type = as_string(fields.next().unwrap(), "UnboundRelationship.type")?;
        let properties = as_map(fields.next().unwrap(), "UnboundRelationship.properties")?;
        Ok(UnboundRelationship {
            id,
            rel_type,
            properties,
        })
    }
}

impl Path {
    /// Decode a `Path` from its wire structure.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = expect_structure(value, StructSig::Path, 3)?.into_iter();
        let nodes = match fields.next().unwrap() {
            Value::List(items) => items
                .into_iter()
                .map(Node::from_value)
                .collect::<Result<Vec<_>>>()?,
            other => return Err(BoltError::protocol(format!("Path.nodes must be a list, got {other:?}"))),
        };
        let relationships = match fields.next().unwrap() {
            Value::List(items) => items
                .into_iter()
                .map(UnboundRelationship::from_value)
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(BoltError::protocol(format!(
                    "Path.relationships must be a list, got {other:?}"
                )))
            }
        };
        let sequence = as_int_list(fields.next().unwrap(), "Path.sequence")?;
        Ok(Path {
            nodes,
            relationships,
            sequence,
        })
    }
}
