mod error;

use std::borrow::Cow;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub use error::*;

pub const JSON_RPC_VERSION: &str = "2.0";

// JSON-RPC 2.0 allows string or number ids; a missing id marks a
// notification, a null id is reserved for framing errors with no
// request correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(u64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Id>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse<'a> {
    pub jsonrpc: &'a str,
    pub id: Cow<'a, Option<Id>>,
    pub result: Cow<'a, Value>,
}

impl<'a> RpcResponse<'a> {
    pub fn new(id: Cow<'a, Option<Id>>, result: Cow<'a, Value>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION,
            id,
            result,
        }
    }
}

// Deserialize the params of a method into its typed struct
pub fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(RpcError::InvalidJsonParams)
}
