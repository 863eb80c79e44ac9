//! Remote ledger capability.
//!
//! The ledger client itself lives outside this workspace. Everything the
//! cache needs from it goes through [`ChainReader`], and every value coming
//! back is a structured [`ChainValue`] that call sites convert with the typed
//! accessors below.

use crate::{FetchError, FetchResult, Weight};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Structured value returned by a contract read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainValue {
    Uint(u128),
    Int(i128),
    Bool(bool),
    Text(String),
    Address(String),
    List(Vec<ChainValue>),
    Record(BTreeMap<String, ChainValue>),
}

impl ChainValue {
    fn type_name(&self) -> &'static str {
        match self {
            ChainValue::Uint(_) => "uint",
            ChainValue::Int(_) => "int",
            ChainValue::Bool(_) => "bool",
            ChainValue::Text(_) => "text",
            ChainValue::Address(_) => "address",
            ChainValue::List(_) => "list",
            ChainValue::Record(_) => "record",
        }
    }

    fn unexpected(&self, key: &str, expected: &str) -> FetchError {
        FetchError::UnexpectedValue {
            key: key.to_string(),
            expected: expected.to_string(),
            got: self.type_name().to_string(),
        }
    }

    /// Read as an unsigned integer. Negative ints are rejected.
    pub fn as_uint(&self, key: &str) -> FetchResult<u128> {
        match self {
            ChainValue::Uint(v) => Ok(*v),
            ChainValue::Int(v) if *v >= 0 => Ok(*v as u128),
            other => Err(other.unexpected(key, "uint")),
        }
    }

    /// Read as a voting weight. Values above `u64::MAX` are rejected.
    pub fn as_weight(&self, key: &str) -> FetchResult<Weight> {
        let raw = self.as_uint(key)?;
        Weight::try_from(raw).map_err(|_| FetchError::UnexpectedValue {
            key: key.to_string(),
            expected: "uint64".to_string(),
            got: raw.to_string(),
        })
    }

    pub fn as_bool(&self, key: &str) -> FetchResult<bool> {
        match self {
            ChainValue::Bool(v) => Ok(*v),
            other => Err(other.unexpected(key, "bool")),
        }
    }

    pub fn as_text(&self, key: &str) -> FetchResult<&str> {
        match self {
            ChainValue::Text(v) | ChainValue::Address(v) => Ok(v),
            other => Err(other.unexpected(key, "text")),
        }
    }

    /// Look up a named field of a record.
    pub fn field(&self, key: &str, name: &str) -> FetchResult<&ChainValue> {
        match self {
            ChainValue::Record(fields) => fields.get(name).ok_or_else(|| {
                FetchError::UnexpectedValue {
                    key: key.to_string(),
                    expected: format!("field '{}'", name),
                    got: "missing".to_string(),
                }
            }),
            other => Err(other.unexpected(key, "record")),
        }
    }
}

/// A contract read: which contract, which method, which arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueCall {
    pub contract_key: String,
    pub method: String,
    pub args: Vec<String>,
}

impl ValueCall {
    pub fn new(contract_key: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            contract_key: contract_key.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for ValueCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.contract_key, self.method, self.args.join(","))
    }
}

/// Event log query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    pub event_signature: String,
    /// Indexed topic values to match, by topic name.
    pub topics: BTreeMap<String, String>,
    pub from_block: u64,
    pub to_block: Option<u64>,
}

/// One decoded event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    pub fields: BTreeMap<String, ChainValue>,
}

/// Read access to the remote ledger.
///
/// Implementations own their own timeouts and retries; any failure comes
/// back as a [`FetchError`].
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Call a read-only contract method.
    async fn read_value(&self, call: &ValueCall) -> FetchResult<ChainValue>;

    /// Query event logs.
    async fn read_logs(&self, filter: &LogFilter) -> FetchResult<Vec<LogEntry>>;

    /// Unix timestamp (seconds) of a block.
    async fn block_timestamp(&self, block_number: u64) -> FetchResult<i64>;
}
