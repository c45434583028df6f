// Error types and error handling module
// Defines the crate's error taxonomy: malformed routes, unsupported
// configurations, collaborator failures, and internal invariants.

use thiserror::Error;

use crate::addresses::PrefixedAddress;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unknown chain prefix: {0}")]
    UnknownChainPrefix(String),
    #[error("unsupported chain id: {0}")]
    UnsupportedChain(u64),
    #[error("malformed route: {0}")]
    InvalidRoute(String),
    #[error("invalid connection into waypoint {index} ({at})")]
    InvalidUpstreamConnection { index: usize, at: PrefixedAddress },
    #[error("invalid connection out of waypoint {index} ({at})")]
    InvalidDownstreamConnection { index: usize, at: PrefixedAddress },
    #[error("cannot batch an empty transaction list")]
    EmptyBatch,
    #[error("delegate calls cannot be batched through a call-only multisend")]
    IncompatibleBatchTarget,
    #[error("a roles modifier cannot initiate a route")]
    RolesAsInitiator,
    #[error("no role available for member {0}")]
    NoRoleAvailable(PrefixedAddress),
    #[error("invalid role identifier: {0}")]
    InvalidRole(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("execution state does not match plan: {0}")]
    InvalidState(String),
    #[error("action {0} needs a signature but none was recorded before it")]
    MissingSignature(usize),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("planner invariant violated: {0}")]
    Internal(&'static str),
}

/// Failures raised by the RPC and relay collaborators. Propagated to the
/// caller unchanged; the core never retries on its own.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        /// Raw revert payload, when the node attached one.
        data: Option<Vec<u8>>,
    },
    #[error("relay error: {0}")]
    Relay(String),
    #[error("decode error: {0}")]
    Decode(String),
}
