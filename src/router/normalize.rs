// Route normalization
// Validates the structural route invariants once, re-derives chain-qualified
// addresses to canonical form, and fills missing Safe thresholds from chain
// state before planning.

use alloy_primitives::Bytes;
use alloy_sol_types::SolCall;
use futures::future::try_join_all;
use tracing::debug;

use crate::config::chain_by_id;
use crate::encoding::ISafe;
use crate::errors::RouteError;
use crate::router::routes::{validate_waypoints, Account, Route};
use crate::transport::jsonrpc::RpcRegistry;

/// Produces a normalized copy of `route`: canonical prefixed addresses, all
/// chains on the registry, every Safe threshold populated. Threshold reads
/// are independent and issued concurrently; transport failures propagate
/// unchanged.
pub async fn normalize_route(route: &Route, rpc: &RpcRegistry) -> Result<Route, RouteError> {
    validate_waypoints(&route.waypoints)?;

    let mut waypoints = route.waypoints.clone();
    for wp in &mut waypoints {
        if let Some(chain) = wp.account.chain() {
            if chain_by_id(chain).is_none() {
                return Err(RouteError::UnsupportedChain(chain));
            }
        }
        wp.account.canonicalize();
    }

    let pending: Vec<usize> = waypoints
        .iter()
        .enumerate()
        .filter_map(|(i, wp)| match wp.account {
            Account::Safe { threshold: None, .. } => Some(i),
            _ => None,
        })
        .collect();

    if !pending.is_empty() {
        let reads = pending.iter().map(|&i| {
            let account = waypoints[i].account.clone();
            async move {
                let Account::Safe { address, chain, .. } = account else {
                    return Err(RouteError::Internal("threshold read on a non-safe"));
                };
                let client = rpc.client(chain)?;
                let ret = client
                    .call(address, &Bytes::from(ISafe::getThresholdCall {}.abi_encode()))
                    .await?;
                let decoded = ISafe::getThresholdCall::abi_decode_returns(&ret, true)
                    .map_err(|e| {
                        RouteError::InvalidRoute(format!("getThreshold decode: {e}"))
                    })?;
                Ok::<u64, RouteError>(decoded.threshold.to::<u64>())
            }
        });
        let thresholds = try_join_all(reads).await?;
        for (&i, value) in pending.iter().zip(thresholds) {
            if let Account::Safe { threshold, .. } = &mut waypoints[i].account {
                *threshold = Some(value);
            }
        }
        debug!(filled = pending.len(), "safe thresholds resolved");
    }

    Route::new(waypoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::routes::{Connection, Waypoint};
    use alloy_primitives::address;

    #[tokio::test]
    async fn rejects_off_registry_chains() {
        let owner = Account::eoa(address!("1111111111111111111111111111111111111111"));
        let vault = Account::safe(
            555,
            address!("2222222222222222222222222222222222222222"),
            Some(1),
        );
        let route = Route {
            id: String::new(),
            initiator: owner.prefixed_address(),
            avatar: vault.prefixed_address(),
            waypoints: vec![
                Waypoint::start(owner.clone()),
                Waypoint::hop(vault, Connection::Owns { from: owner.prefixed_address() }),
            ],
        };
        let err = normalize_route(&route, &RpcRegistry::new()).await.unwrap_err();
        assert!(matches!(err, RouteError::UnsupportedChain(555)));
    }

    #[tokio::test]
    async fn passes_through_without_io_when_thresholds_are_known() {
        let owner = Account::eoa(address!("1111111111111111111111111111111111111111"));
        let vault = Account::safe(
            1,
            address!("2222222222222222222222222222222222222222"),
            Some(2),
        );
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(vault, Connection::Owns { from: owner.prefixed_address() }),
        ])
        .unwrap();
        // Nothing to fill, so the registry is never consulted.
        let normalized = normalize_route(&route, &RpcRegistry::new()).await.unwrap();
        assert_eq!(normalized.id, route.id);
    }

    #[tokio::test]
    async fn surfaces_the_violated_invariant() {
        let owner = Account::eoa(address!("1111111111111111111111111111111111111111"));
        let stranger = Account::eoa(address!("3333333333333333333333333333333333333333"));
        let vault = Account::safe(
            1,
            address!("2222222222222222222222222222222222222222"),
            Some(1),
        );
        let route = Route {
            id: String::new(),
            initiator: owner.prefixed_address(),
            avatar: vault.prefixed_address(),
            waypoints: vec![
                Waypoint::start(owner),
                Waypoint::hop(
                    vault,
                    Connection::Owns { from: stranger.prefixed_address() },
                ),
            ],
        };
        let err = normalize_route(&route, &RpcRegistry::new()).await.unwrap_err();
        assert!(err.to_string().contains("does not match predecessor"));
    }
}
