// Permission checking
// Proves, without submitting anything, whether the first Roles hop of a
// route would reject a call: plans a dry-run sub-route from the role member,
// simulates its entry action via gas estimation, and classifies any revert
// against the catalogue of Roles violation shapes.
//
// Known limitation, preserved on purpose: an unrecognized revert (or one
// with no data) is reported as allowed. This checker answers "is there a
// permission problem", not "would the call succeed on-chain"; callers must
// not conflate the two.

use std::fmt;
use std::sync::Arc;

use alloy_sol_types::{sol, SolError};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::errors::{RouteError, TransportError};
use crate::router::normalize::normalize_route;
use crate::router::planner::{
    ExecutionAction, NonceStrategy, PlanOptions, Planner, SafeOptions,
};
use crate::router::routes::{Account, Connection, MetaTransaction, Route, Waypoint};
use crate::transport::jsonrpc::RpcRegistry;
use crate::transport::relay::RelayClient;

sol! {
    // Roles v1 permission errors.
    error NoMembership();
    error TargetAddressNotAllowed();
    error DelegateCallNotAllowed();
    error FunctionNotAllowed();
    error SendNotAllowed();
    error ParameterNotAllowed();
    error ParameterLessThanAllowed();
    error ParameterGreaterThanAllowed();
    error ParameterNotOneOfAllowed();
    error UnacceptableMultiSendOffset();

    // Roles v2 permission errors.
    error NotAuthorized(address module);
    error ConditionViolation(uint8 status, bytes32 info);
}

/// Everything a Roles modifier can reject a call for, across both module
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PermissionViolation {
    NoMembership,
    NotAuthorized,
    DelegateCallNotAllowed,
    TargetAddressNotAllowed,
    FunctionNotAllowed,
    SendNotAllowed,
    ParameterNotAllowed,
    ParameterLessThanAllowed,
    ParameterGreaterThanAllowed,
    ParameterNotOneOfAllowed,
    UnacceptableMultiSendOffset,
    OrViolation,
    NorViolation,
    ParameterNotAMatch,
    NotEveryArrayElementPasses,
    NoArrayElementPasses,
    ParameterNotSubsetOfAllowed,
    BitmaskOverflow,
    BitmaskNotAllowed,
    CustomConditionViolation,
    AllowanceExceeded,
    CallAllowanceExceeded,
    EtherAllowanceExceeded,
}

impl fmt::Display for PermissionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Result of a permission check. Denial is a first-class value, not an
/// error: it is the expected outcome of checking, not a failure of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    Denied(PermissionViolation),
}

impl Serialize for PermissionCheck {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PermissionCheck::Allowed => {
                let mut s = serializer.serialize_struct("PermissionCheck", 1)?;
                s.serialize_field("success", &true)?;
                s.end()
            }
            PermissionCheck::Denied(violation) => {
                let mut s = serializer.serialize_struct("PermissionCheck", 2)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("error", violation)?;
                s.end()
            }
        }
    }
}

/// Maps a raw revert payload onto the violation catalogue.
pub fn decode_violation(data: &[u8]) -> Option<PermissionViolation> {
    if data.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = data[..4].try_into().ok()?;
    let simple = [
        (NoMembership::SELECTOR, PermissionViolation::NoMembership),
        (TargetAddressNotAllowed::SELECTOR, PermissionViolation::TargetAddressNotAllowed),
        (DelegateCallNotAllowed::SELECTOR, PermissionViolation::DelegateCallNotAllowed),
        (FunctionNotAllowed::SELECTOR, PermissionViolation::FunctionNotAllowed),
        (SendNotAllowed::SELECTOR, PermissionViolation::SendNotAllowed),
        (ParameterNotAllowed::SELECTOR, PermissionViolation::ParameterNotAllowed),
        (ParameterLessThanAllowed::SELECTOR, PermissionViolation::ParameterLessThanAllowed),
        (
            ParameterGreaterThanAllowed::SELECTOR,
            PermissionViolation::ParameterGreaterThanAllowed,
        ),
        (ParameterNotOneOfAllowed::SELECTOR, PermissionViolation::ParameterNotOneOfAllowed),
        (
            UnacceptableMultiSendOffset::SELECTOR,
            PermissionViolation::UnacceptableMultiSendOffset,
        ),
        (NotAuthorized::SELECTOR, PermissionViolation::NotAuthorized),
    ];
    if let Some((_, violation)) = simple.iter().find(|(s, _)| *s == selector) {
        return Some(*violation);
    }
    if selector == ConditionViolation::SELECTOR {
        let decoded = ConditionViolation::abi_decode(data, true).ok()?;
        return condition_status(decoded.status);
    }
    None
}

/// Status byte of the v2 `ConditionViolation` error. Zero is "ok" and never
/// reverts; unknown values fall through to the permissive default.
fn condition_status(status: u8) -> Option<PermissionViolation> {
    use PermissionViolation::*;
    Some(match status {
        1 => DelegateCallNotAllowed,
        2 => TargetAddressNotAllowed,
        3 => FunctionNotAllowed,
        4 => SendNotAllowed,
        5 => OrViolation,
        6 => NorViolation,
        7 => ParameterNotAllowed,
        8 => ParameterLessThanAllowed,
        9 => ParameterGreaterThanAllowed,
        10 => ParameterNotAMatch,
        11 => NotEveryArrayElementPasses,
        12 => NoArrayElementPasses,
        13 => ParameterNotSubsetOfAllowed,
        14 => BitmaskOverflow,
        15 => BitmaskNotAllowed,
        16 => CustomConditionViolation,
        17 => AllowanceExceeded,
        18 => CallAllowanceExceeded,
        19 => EtherAllowanceExceeded,
        _ => return None,
    })
}

pub struct PermissionChecker {
    rpc: Arc<RpcRegistry>,
    relay: Arc<RelayClient>,
}

impl PermissionChecker {
    pub fn new(rpc: Arc<RpcRegistry>, relay: Arc<RelayClient>) -> Self {
        Self { rpc, relay }
    }

    /// Checks `transactions` against the first Roles hop of `route`. Routes
    /// without a Roles hop are trivially allowed, with no simulation issued.
    pub async fn check(
        &self,
        transactions: &[MetaTransaction],
        route: &Route,
        options: &PlanOptions,
    ) -> Result<PermissionCheck, RouteError> {
        let route = normalize_route(route, &self.rpc).await?;
        let Some(roles_index) = route
            .waypoints
            .iter()
            .position(|wp| matches!(wp.account, Account::Roles { .. }))
        else {
            return Ok(PermissionCheck::Allowed);
        };
        if roles_index == 0 {
            return Err(RouteError::RolesAsInitiator);
        }

        let sub_route = member_sub_route(&route, roles_index)?;
        let options = placeholder_nonces(&sub_route, options);
        let planner = Planner::new(self.rpc.clone(), self.relay.clone());
        let plan = planner.plan(transactions, &sub_route, &options).await?;
        let Some(ExecutionAction::ExecuteTransaction { chain, from, transaction }) =
            plan.first()
        else {
            return Err(RouteError::Internal("dry-run plan must start with an execution"));
        };

        let client = self.rpc.client(*chain)?;
        match client
            .estimate_gas(*from, transaction.to, transaction.value, &transaction.data)
            .await
        {
            Ok(_) => Ok(PermissionCheck::Allowed),
            Err(TransportError::Rpc { data: Some(revert), .. }) => {
                match decode_violation(&revert) {
                    Some(violation) => {
                        info!(%violation, route = %route.id, "permission check denied");
                        Ok(PermissionCheck::Denied(violation))
                    }
                    // A revert this checker does not recognize is not a
                    // permission problem from its narrow point of view.
                    None => Ok(PermissionCheck::Allowed),
                }
            }
            Err(TransportError::Rpc { data: None, .. }) => Ok(PermissionCheck::Allowed),
            Err(other) => Err(other.into()),
        }
    }

    /// Races one simulation per candidate role and returns the first that is
    /// not rejected, or `None` when every candidate violates. Losing
    /// simulations are dropped, not awaited.
    pub async fn determine_role(
        &self,
        transactions: &[MetaTransaction],
        route: &Route,
        candidates: &[String],
    ) -> Result<Option<String>, RouteError> {
        let Some(modifier) = route.waypoints.iter().find_map(|wp| match &wp.account {
            Account::Roles { address, .. } => Some(*address),
            _ => None,
        }) else {
            return Ok(None);
        };

        let mut runs: FuturesUnordered<_> = candidates
            .iter()
            .map(|candidate| {
                let mut options = PlanOptions::default();
                options.roles.insert(modifier, candidate.clone());
                async move {
                    let outcome = self.check(transactions, route, &options).await;
                    (candidate.clone(), outcome)
                }
            })
            .collect();

        let mut first_error = None;
        while let Some((candidate, outcome)) = runs.next().await {
            match outcome {
                Ok(PermissionCheck::Allowed) => {
                    debug!(role = %candidate, "role determined");
                    return Ok(Some(candidate));
                }
                Ok(PermissionCheck::Denied(_)) => continue,
                Err(err) => first_error = first_error.or(Some(err)),
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

/// The dry-run route: a synthetic EOA standing in for the member that feeds
/// the Roles hop, followed by the remainder of the original route.
fn member_sub_route(route: &Route, roles_index: usize) -> Result<Route, RouteError> {
    let member = Account::eoa(route.waypoints[roles_index - 1].account.address());
    let mut waypoints = Vec::with_capacity(route.waypoints.len() - roles_index + 1);
    waypoints.push(Waypoint::start(member.clone()));
    for (offset, wp) in route.waypoints[roles_index..].iter().enumerate() {
        let mut wp = wp.clone();
        if offset == 0 {
            match wp.connection.as_mut() {
                Some(Connection::IsMember { from, .. }) => {
                    *from = member.prefixed_address();
                }
                _ => {
                    return Err(RouteError::InvalidUpstreamConnection {
                        index: roles_index,
                        at: wp.account.prefixed_address(),
                    })
                }
            }
        }
        waypoints.push(wp);
    }
    Route::new(waypoints)
}

/// Dry runs never talk to the relay: every Safe on the sub-route gets a
/// literal placeholder nonce.
fn placeholder_nonces(sub_route: &Route, options: &PlanOptions) -> PlanOptions {
    let mut options = options.clone();
    for wp in &sub_route.waypoints {
        if let Account::Safe { address, .. } = wp.account {
            options.safes.entry(address).or_insert_with(SafeOptions::default).nonce =
                NonceStrategy::Literal(0);
        }
    }
    options
}
