// Library root module for safe-router
// Plans and executes transactions that traverse chains of on-chain
// authorization: EOAs, Safe multisigs, Roles permission modifiers and Delay
// timelocks.

pub mod addresses;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod metrics;
pub mod multisend;
pub mod permissions;
pub mod router;
pub mod transport;

pub use addresses::PrefixedAddress;
pub use errors::{RouteError, TransportError};
pub use permissions::{PermissionCheck, PermissionChecker, PermissionViolation};
pub use router::{
    rank_routes, Account, Connection, ExecutionAction, ExecutionEngine, ExecutionPlan,
    ExecutionState, MetaTransaction, Operation, PlanOptions, Planner, Route, Waypoint,
};
pub use transport::{RelayClient, RpcRegistry};
