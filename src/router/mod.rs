// Router module - route model, planning and execution core
// Route data types and canonicalization, the normalizer, the backward
// planning fold, the plan executor, and the friction ranker.

pub mod canonical;
pub mod execution;
pub mod normalize;
pub mod planner;
pub mod routes;
pub mod selector;

pub use execution::{ExecutionEngine, ExecutionState};
pub use normalize::normalize_route;
pub use planner::{ExecutionAction, ExecutionPlan, PlanOptions, Planner};
pub use routes::{Account, Connection, MetaTransaction, Operation, Route, Waypoint};
pub use selector::rank_routes;
