use std::fmt::{Display, Formatter};

#[cfg(feature = "rpc-server")]
use actix_web::{HttpResponse, ResponseError};

use crate::rpc::{Id, JSON_RPC_VERSION};
use anyhow::Error as AnyError;
use serde_json::{Error as SerdeError, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Invalid JSON request")]
    InvalidJsonRequest,
    #[error("Invalid request: {}", _0)]
    InvalidRequest(&'static str),
    #[error("Expected json_rpc set to '2.0'")]
    InvalidVersion,
    #[error("Method '{}' in request was not found", _0)]
    MethodNotFound(String),
    #[error("x402 payments not enabled")]
    PaymentsDisabled,
    #[error("Invalid params: {}", _0)]
    InvalidJsonParams(SerdeError),
    #[error("Invalid params: {}", _0)]
    InvalidParams(&'static str),
    #[error("Expected parameters for this method but was not present")]
    ExpectedParams,
    #[error("Not authenticated, complete the handshake first")]
    NotAuthenticated,
    #[error("Authentication failed: {}", _0)]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded, retry after {} seconds", retry_after)]
    RateLimitExceeded { retry_after: u64, remaining: u32 },
    #[error("Agent '{}' was not found", _0)]
    AgentNotFound(String),
    #[error("Market '{}' was not found", _0)]
    MarketNotFound(String),
    #[error("Payment failed: {}", _0)]
    PaymentFailed(String),
    #[error("Internal error: {}", _0)]
    InternalError(&'static str),
    #[error("{:#}", _0)]
    Any(#[from] AnyError),
    #[error(transparent)]
    SerializeResponse(SerdeError),
}

impl RpcError {
    pub fn get_code(&self) -> i16 {
        match self {
            // JSON RPC protocol errors
            Self::InvalidJsonRequest | Self::InvalidRequest(_) | Self::InvalidVersion => -32600,
            Self::MethodNotFound(_) | Self::PaymentsDisabled => -32601,
            Self::InvalidJsonParams(_) | Self::InvalidParams(_) | Self::ExpectedParams => -32602,
            Self::InternalError(_) | Self::Any(_) | Self::SerializeResponse(_) => -32603,
            // A2A layer errors (implementation-defined server range)
            Self::NotAuthenticated => -32001,
            Self::AuthenticationFailed(_) => -32002,
            Self::RateLimitExceeded { .. } => -32003,
            Self::AgentNotFound(_) => -32004,
            Self::MarketNotFound(_) => -32005,
            Self::PaymentFailed(_) => -32006,
        }
    }

    // Symbolic name reported in `error.data.name` so clients can match on
    // a stable identifier instead of the numeric code
    pub fn get_name(&self) -> &'static str {
        match self {
            Self::InvalidJsonRequest | Self::InvalidRequest(_) | Self::InvalidVersion => {
                "INVALID_REQUEST"
            }
            Self::MethodNotFound(_) | Self::PaymentsDisabled => "METHOD_NOT_FOUND",
            Self::InvalidJsonParams(_) | Self::InvalidParams(_) | Self::ExpectedParams => {
                "INVALID_PARAMS"
            }
            Self::InternalError(_) | Self::Any(_) | Self::SerializeResponse(_) => "INTERNAL_ERROR",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::MarketNotFound(_) => "MARKET_NOT_FOUND",
            Self::PaymentFailed(_) => "PAYMENT_FAILED",
        }
    }
}

#[derive(Debug)]
pub struct RpcResponseError {
    id: Option<Id>,
    error: RpcError,
}

impl RpcResponseError {
    pub fn new<T: Into<RpcError>>(id: Option<Id>, error: T) -> Self {
        Self {
            id,
            error: error.into(),
        }
    }

    pub fn get_id(&self) -> Value {
        match &self.id {
            // Converting simple types to JSON Value, use direct conversion instead of json!()
            Some(id) => serde_json::to_value(id).unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    pub fn get_error(&self) -> &RpcError {
        &self.error
    }

    pub fn to_json(&self) -> Value {
        // Build JSON manually instead of using json!() macro to avoid unwrap
        let mut obj = serde_json::Map::new();
        obj.insert(
            "jsonrpc".to_string(),
            Value::String(JSON_RPC_VERSION.to_string()),
        );
        obj.insert("id".to_string(), self.get_id());

        let mut data = serde_json::Map::new();
        data.insert(
            "name".to_string(),
            Value::String(self.error.get_name().to_string()),
        );
        if let RpcError::RateLimitExceeded {
            retry_after,
            remaining,
        } = &self.error
        {
            data.insert("retryAfter".to_string(), Value::Number((*retry_after).into()));
            data.insert(
                "remainingTokens".to_string(),
                Value::Number((*remaining).into()),
            );
        }

        let mut error_obj = serde_json::Map::new();
        error_obj.insert(
            "code".to_string(),
            Value::Number(self.error.get_code().into()),
        );
        error_obj.insert(
            "message".to_string(),
            Value::String(format!("{:#}", self.error)),
        );
        error_obj.insert("data".to_string(), Value::Object(data));
        obj.insert("error".to_string(), Value::Object(error_obj));

        Value::Object(obj)
    }
}

impl Display for RpcResponseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RpcError[id: {}, error: {:#}]",
            self.get_id(),
            self.error
        )
    }
}

#[cfg(feature = "rpc-server")]
impl ResponseError for RpcResponseError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::Ok().json(self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(RpcError::InvalidJsonRequest.get_code(), -32600);
        assert_eq!(
            RpcError::MethodNotFound("foo".to_string()).get_code(),
            -32601
        );
        assert_eq!(RpcError::ExpectedParams.get_code(), -32602);
        assert_eq!(RpcError::InternalError("boom").get_code(), -32603);
        assert_eq!(RpcError::NotAuthenticated.get_code(), -32001);
        assert_eq!(
            RpcError::AuthenticationFailed("bad signature".to_string()).get_code(),
            -32002
        );
        assert_eq!(
            RpcError::RateLimitExceeded {
                retry_after: 60,
                remaining: 0
            }
            .get_code(),
            -32003
        );
        assert_eq!(
            RpcError::AgentNotFound("agent-1".to_string()).get_code(),
            -32004
        );
        assert_eq!(
            RpcError::MarketNotFound("m1".to_string()).get_code(),
            -32005
        );
        assert_eq!(RpcError::PaymentFailed("expired".to_string()).get_code(), -32006);
        // Disabled payments reject like an unknown method
        assert_eq!(RpcError::PaymentsDisabled.get_code(), -32601);
    }

    #[test]
    fn test_malformed_request_gets_null_id() {
        let error = RpcResponseError::new(None, RpcError::InvalidJsonRequest);
        let encoded = error.to_json();
        assert_eq!(encoded["id"], Value::Null);
        assert_eq!(encoded["error"]["code"], -32600);
        assert_eq!(encoded["error"]["data"]["name"], "INVALID_REQUEST");
    }

    #[test]
    fn test_rate_limit_error_carries_retry_hint() {
        let error = RpcResponseError::new(
            Some(Id::Number(7)),
            RpcError::RateLimitExceeded {
                retry_after: 42,
                remaining: 0,
            },
        );
        let encoded = error.to_json();
        assert_eq!(encoded["id"], 7);
        assert_eq!(encoded["error"]["data"]["retryAfter"], 42);
        assert_eq!(encoded["error"]["data"]["remainingTokens"], 0);
    }
}
