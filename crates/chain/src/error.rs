//! Error taxonomy for every chain interaction.
//!
//! Node-side rejections arrive as free-form JSON-RPC messages. They are
//! classified once, here, so the retry layer can decide on a typed variant
//! instead of matching strings at every call site.

use alloy::transports::{RpcError, TransportError};
use thiserror::Error;

/// Errors produced by the connectivity layer, contract clients and signer.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Endpoint unreachable or the connection dropped mid-request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the configured timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Endpoint is throttling us (HTTP 429 or provider-specific message).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Nonce race: the node already saw this nonce or a lower one.
    #[error("nonce rejected: {0}")]
    NonceRace(String),

    /// Gas price below the node's acceptance floor.
    #[error("transaction underpriced: {0}")]
    Underpriced(String),

    /// Signature could not be recovered or does not match the sender.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Account cannot pay for gas or value.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The EVM reverted during estimation or a read call.
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// Any other JSON-RPC error response.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response bytes did not match the expected ABI.
    #[error("decode error: {0}")]
    Decode(String),

    /// Oracle answered with an unusable value.
    #[error("oracle read failed: {0}")]
    OracleRead(String),

    /// Failover exhausted its attempt budget.
    #[error("no healthy endpoint after {attempts} attempts")]
    NoHealthyEndpoint { attempts: u32 },

    /// Connected ledger reports a chain id we are not configured for.
    #[error("unsupported chain id {actual} (expected {expected})")]
    UnsupportedChain { expected: u64, actual: u64 },

    /// Local signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl ChainError {
    /// Whether the retry policy should try this operation again.
    ///
    /// Network, timeout, throttling, nonce races and underpriced gas are
    /// transient. Signature, funds, reverts, decode failures and exhausted
    /// failover surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout(_)
                | Self::RateLimited(_)
                | Self::NonceRace(_)
                | Self::Underpriced(_)
        )
    }

    /// Whether the endpoint itself is suspect and should be failed over.
    ///
    /// Nonce races and underpriced gas are account-level conditions; moving
    /// to another endpoint would not help.
    pub fn is_endpoint_fault(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }

    /// Classify a JSON-RPC error response by its message.
    pub fn from_rpc_message(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        let owned = message.to_string();

        if lower.contains("nonce too low")
            || lower.contains("already known")
            || lower.contains("nonce has already been used")
            || lower.contains("replacement transaction")
        {
            Self::NonceRace(owned)
        } else if lower.contains("underpriced") || lower.contains("fee too low") {
            Self::Underpriced(owned)
        } else if lower.contains("insufficient funds") {
            Self::InsufficientFunds(owned)
        } else if lower.contains("invalid signature") || lower.contains("invalid sender") {
            Self::InvalidSignature(owned)
        } else if lower.contains("execution reverted") || lower.contains("revert") {
            Self::Reverted(owned)
        } else if code == 429
            || lower.contains("rate limit")
            || lower.contains("too many requests")
        {
            Self::RateLimited(owned)
        } else {
            Self::Rpc {
                code,
                message: owned,
            }
        }
    }
}

impl From<TransportError> for ChainError {
    fn from(err: TransportError) -> Self {
        match err {
            RpcError::ErrorResp(payload) => {
                Self::from_rpc_message(payload.code, &payload.message.to_string())
            }
            other => {
                let message = other.to_string();
                if message.contains("429") {
                    Self::RateLimited(message)
                } else {
                    Self::Transport(message)
                }
            }
        }
    }
}

impl From<alloy::sol_types::Error> for ChainError {
    fn from(err: alloy::sol_types::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_messages_are_retryable() {
        for msg in [
            "nonce too low",
            "already known",
            "replacement transaction underpriced",
            "Nonce too low: next nonce 7, tx nonce 6",
        ] {
            let err = ChainError::from_rpc_message(-32000, msg);
            assert!(err.is_retryable(), "{msg} should be retryable");
            assert!(!err.is_endpoint_fault(), "{msg} is an account condition");
        }
    }

    #[test]
    fn test_fatal_messages_are_not_retryable() {
        let funds = ChainError::from_rpc_message(
            -32000,
            "insufficient funds for gas * price + value",
        );
        assert!(matches!(funds, ChainError::InsufficientFunds(_)));
        assert!(!funds.is_retryable());

        let sig = ChainError::from_rpc_message(-32000, "invalid sender");
        assert!(matches!(sig, ChainError::InvalidSignature(_)));
        assert!(!sig.is_retryable());

        let revert = ChainError::from_rpc_message(3, "execution reverted: Not approved");
        assert!(matches!(revert, ChainError::Reverted(_)));
        assert!(!revert.is_retryable());
    }

    #[test]
    fn test_underpriced_and_rate_limit() {
        let under = ChainError::from_rpc_message(-32000, "transaction underpriced");
        assert!(matches!(under, ChainError::Underpriced(_)));
        assert!(under.is_retryable());

        let limited = ChainError::from_rpc_message(429, "Too Many Requests");
        assert!(matches!(limited, ChainError::RateLimited(_)));
        assert!(limited.is_endpoint_fault());
    }

    #[test]
    fn test_unknown_rpc_error_is_fatal() {
        let err = ChainError::from_rpc_message(-32601, "method not found");
        assert!(matches!(err, ChainError::Rpc { code: -32601, .. }));
        assert!(!err.is_retryable());
    }
}
