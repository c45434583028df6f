// Execution planning
// The planner walks a route backward from its avatar to its initiator and
// rewrites the head of a growing action list at each hop, so that every
// account along the way wraps, approves or forwards the payload with correct
// authorization. The fold itself is pure; network reads (normalization,
// nonce resolution) happen up front.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ChainId;
use crate::encoding::{
    encode_role_key, parse_role_index, pre_approved_signature, safe_transaction_hash,
    safe_typed_data, IDelay, IRolesV1, IRolesV2, ISafe, SafeTransactionData,
};
use crate::errors::RouteError;
use crate::multisend::batch;
use crate::router::normalize::normalize_route;
use crate::router::routes::{
    Account, Connection, MetaTransaction, RolesVersion, Route, Waypoint,
};
use crate::transport::jsonrpc::RpcRegistry;
use crate::transport::relay::RelayClient;

/// One concrete step of an execution plan. Outputs chain: when a pending
/// `SafeTransaction`/`ProposeTransaction` carries no signature, the executor
/// splices in the output recorded for the immediately preceding action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionAction {
    #[serde(rename = "EXECUTE_TRANSACTION", rename_all = "camelCase")]
    ExecuteTransaction {
        chain: ChainId,
        from: Address,
        transaction: MetaTransaction,
    },
    #[serde(rename = "SAFE_TRANSACTION", rename_all = "camelCase")]
    SafeTransaction {
        chain: ChainId,
        safe: Address,
        transaction: SafeTransactionData,
        proposer: Option<Address>,
        signature: Option<Bytes>,
    },
    #[serde(rename = "PROPOSE_TRANSACTION", rename_all = "camelCase")]
    ProposeTransaction {
        chain: ChainId,
        safe: Address,
        transaction: SafeTransactionData,
        proposer: Option<Address>,
        signature: Option<Bytes>,
    },
    #[serde(rename = "SIGN_TYPED_DATA", rename_all = "camelCase")]
    SignTypedData {
        chain: ChainId,
        from: Address,
        data: serde_json::Value,
    },
}

/// Ordered, non-empty action sequence realizing one route traversal.
pub type ExecutionPlan = Vec<ExecutionAction>;

/// How the nonce of a to-be-proposed Safe transaction is determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NonceStrategy {
    /// Next free slot according to the transaction service queue.
    #[default]
    Queue,
    /// The Safe's on-chain counter, read directly.
    OnChain,
    /// A caller-supplied literal.
    Literal(u64),
}

#[derive(Debug, Clone, Default)]
pub struct SafeOptions {
    /// Never execute directly for this Safe, even at threshold 1.
    pub propose_only: bool,
    pub nonce: NonceStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Batching-contract preference override; defaults to the terminal Roles
    /// hop's registered candidates.
    pub multisend: Option<Vec<Address>>,
    /// Role override per Roles modifier address.
    pub roles: BTreeMap<Address, String>,
    /// Per-Safe execution policy.
    pub safes: BTreeMap<Address, SafeOptions>,
}

/// Plans route executions against live chain state.
pub struct Planner {
    rpc: Arc<RpcRegistry>,
    relay: Arc<RelayClient>,
}

impl Planner {
    pub fn new(rpc: Arc<RpcRegistry>, relay: Arc<RelayClient>) -> Self {
        Self { rpc, relay }
    }

    /// Normalizes the route, batches the calls, resolves the nonces every
    /// pending Safe transaction will need, and folds the route into a plan.
    pub async fn plan(
        &self,
        transactions: &[MetaTransaction],
        route: &Route,
        options: &PlanOptions,
    ) -> Result<ExecutionPlan, RouteError> {
        let route = normalize_route(route, &self.rpc).await?;
        let batched = batch(transactions, &batching_candidates(&route, options))?;
        let nonces = self.resolve_nonces(&route, options).await?;
        let plan = plan_route(&batched, &route, options, &nonces)?;
        info!(route = %route.id, actions = plan.len(), "execution plan built");
        Ok(plan)
    }

    /// Fetches nonces for every Safe that may need a prepared transaction:
    /// the hops reached through an OWNS edge. Reads are independent and run
    /// concurrently.
    async fn resolve_nonces(
        &self,
        route: &Route,
        options: &PlanOptions,
    ) -> Result<BTreeMap<Address, u64>, RouteError> {
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for wp in &route.waypoints {
            let Account::Safe { address, chain, .. } = &wp.account else {
                continue;
            };
            if matches!(wp.connection, Some(Connection::Owns { .. })) && seen.insert(*address) {
                targets.push((*chain, *address));
            }
        }
        let reads = targets.into_iter().map(|(chain, address)| {
            let strategy = options
                .safes
                .get(&address)
                .map(|o| o.nonce.clone())
                .unwrap_or_default();
            let rpc = self.rpc.clone();
            let relay = self.relay.clone();
            async move {
                let nonce = match strategy {
                    NonceStrategy::Literal(n) => n,
                    NonceStrategy::OnChain => {
                        let ret = rpc
                            .client(chain)?
                            .call(address, &Bytes::from(ISafe::nonceCall {}.abi_encode()))
                            .await?;
                        ISafe::nonceCall::abi_decode_returns(&ret, true)
                            .map_err(|e| {
                                RouteError::InvalidRoute(format!("nonce decode: {e}"))
                            })?
                            .nonce
                            .to::<u64>()
                    }
                    NonceStrategy::Queue => relay.next_nonce(chain, address).await?,
                };
                Ok::<(Address, u64), RouteError>((address, nonce))
            }
        });
        Ok(try_join_all(reads).await?.into_iter().collect())
    }
}

/// Multisend preference: caller override, else the candidates registered on
/// the terminal Roles hop.
fn batching_candidates(route: &Route, options: &PlanOptions) -> Vec<Address> {
    if let Some(preferred) = &options.multisend {
        return preferred.clone();
    }
    route
        .waypoints
        .iter()
        .rev()
        .find_map(|wp| match &wp.account {
            Account::Roles { multisend, .. } => Some(multisend.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn resolved_nonce(nonces: &BTreeMap<Address, u64>, safe: Address) -> Result<u64, RouteError> {
    nonces
        .get(&safe)
        .copied()
        .ok_or(RouteError::Internal("safe nonce was not resolved"))
}

/// The pure backward fold over a normalized route. `transaction` is the
/// already-batched call, `nonces` the pre-resolved values for every Safe
/// reached through an OWNS edge.
pub fn plan_route(
    transaction: &MetaTransaction,
    route: &Route,
    options: &PlanOptions,
    nonces: &BTreeMap<Address, u64>,
) -> Result<ExecutionPlan, RouteError> {
    let waypoints = &route.waypoints;
    let last = waypoints
        .last()
        .ok_or_else(|| RouteError::InvalidRoute("empty route".to_string()))?;
    let Account::Safe { address: avatar, chain: avatar_chain, .. } = last.account else {
        return Err(RouteError::InvalidRoute(
            "the route avatar must be a Safe".to_string(),
        ));
    };

    // Seed: deliver the batched call to the avatar as a pending Safe
    // transaction. Hops upstream rewrite this head until it is executable.
    let seed_nonce = match last.connection {
        Some(Connection::Owns { .. }) => resolved_nonce(nonces, avatar)?,
        _ => nonces.get(&avatar).copied().unwrap_or(0),
    };
    let mut plan: ExecutionPlan = vec![ExecutionAction::SafeTransaction {
        chain: avatar_chain,
        safe: avatar,
        transaction: SafeTransactionData::from_meta(transaction, seed_nonce),
        proposer: None,
        signature: None,
    }];

    for index in (0..waypoints.len()).rev() {
        let wp = &waypoints[index];
        match &wp.account {
            Account::Eoa { address, .. } => plan_as_eoa(&mut plan, *address, index)?,
            Account::Safe { address, chain, threshold, .. } => {
                plan_as_safe(&mut plan, wp, *address, *chain, *threshold, index, options, nonces)?
            }
            Account::Roles { .. } => plan_as_roles(&mut plan, waypoints, index, options)?,
            Account::Delay { address, chain, .. } => {
                plan_as_delay(&mut plan, wp, *address, *chain, index)?
            }
        }
    }
    Ok(plan)
}

/// An EOA can only start a route. If the head still needs a signer, the EOA
/// signs the Safe transaction hash off-chain; otherwise it just sends.
fn plan_as_eoa(plan: &mut ExecutionPlan, eoa: Address, index: usize) -> Result<(), RouteError> {
    if index != 0 {
        return Err(RouteError::Internal("EOA past the starting point"));
    }
    let prepend = match plan.first_mut() {
        Some(
            ExecutionAction::SafeTransaction { chain, safe, transaction, proposer, .. }
            | ExecutionAction::ProposeTransaction { chain, safe, transaction, proposer, .. },
        ) if proposer.is_none() => {
            *proposer = Some(eoa);
            Some((*chain, safe_typed_data(*chain, *safe, transaction)))
        }
        _ => None,
    };
    if let Some((chain, typed_data)) = prepend {
        plan.insert(
            0,
            ExecutionAction::SignTypedData { chain, from: eoa, data: typed_data },
        );
    }
    Ok(())
}

/// What a Safe hop has to carry out.
enum SafePayload {
    /// The pending Safe transaction destined for this very Safe.
    Own(SafeTransactionData),
    /// A raw call this Safe must send.
    Call(MetaTransaction),
}

enum HeadKind {
    OwnPending,
    DownstreamPending,
    OwnExecute,
    Other,
}

/// The "IN" half of a Safe hop: classify the head and, when a downstream
/// Safe still waits for a signer, satisfy it with this Safe's pre-approved
/// signature while turning the approval itself into the new payload.
fn take_safe_payload(
    plan: &mut ExecutionPlan,
    safe: Address,
) -> Result<SafePayload, RouteError> {
    let kind = match plan.first() {
        Some(
            ExecutionAction::SafeTransaction { safe: target, .. }
            | ExecutionAction::ProposeTransaction { safe: target, .. },
        ) => {
            if *target == safe {
                HeadKind::OwnPending
            } else {
                HeadKind::DownstreamPending
            }
        }
        Some(ExecutionAction::ExecuteTransaction { from, .. }) if *from == safe => {
            HeadKind::OwnExecute
        }
        _ => HeadKind::Other,
    };

    match kind {
        HeadKind::OwnPending => match plan.remove(0) {
            ExecutionAction::SafeTransaction { transaction, .. }
            | ExecutionAction::ProposeTransaction { transaction, .. } => {
                Ok(SafePayload::Own(transaction))
            }
            _ => Err(RouteError::Internal("safe head changed shape")),
        },
        HeadKind::OwnExecute => match plan.remove(0) {
            ExecutionAction::ExecuteTransaction { transaction, .. } => {
                Ok(SafePayload::Call(transaction))
            }
            _ => Err(RouteError::Internal("safe head changed shape")),
        },
        HeadKind::DownstreamPending => {
            let Some(
                ExecutionAction::SafeTransaction { chain, safe: target, transaction, proposer, signature }
                | ExecutionAction::ProposeTransaction { chain, safe: target, transaction, proposer, signature },
            ) = plan.first_mut()
            else {
                return Err(RouteError::Internal("safe head changed shape"));
            };
            let hash = safe_transaction_hash(*chain, *target, transaction);
            *proposer = Some(safe);
            *signature = Some(pre_approved_signature(safe));
            let downstream = *target;
            Ok(SafePayload::Call(MetaTransaction::call(
                downstream,
                U256::ZERO,
                Bytes::from(ISafe::approveHashCall { hashToApprove: hash }.abi_encode()),
            )))
        }
        HeadKind::Other => Err(RouteError::Internal("unexpected plan head at a safe hop")),
    }
}

/// The "OUT" half of a Safe hop: hand the payload upstream according to how
/// the predecessor is connected.
#[allow(clippy::too_many_arguments)]
fn plan_as_safe(
    plan: &mut ExecutionPlan,
    wp: &Waypoint,
    address: Address,
    chain: ChainId,
    threshold: Option<u64>,
    index: usize,
    options: &PlanOptions,
    nonces: &BTreeMap<Address, u64>,
) -> Result<(), RouteError> {
    let payload = take_safe_payload(plan, address)?;

    match &wp.connection {
        // Initiator Safe: the caller executes from the Safe's own context.
        None => {
            let call = match payload {
                SafePayload::Call(call) => call,
                SafePayload::Own(_) => {
                    return Err(RouteError::Internal("initiator safe cannot be the avatar"))
                }
            };
            plan.insert(
                0,
                ExecutionAction::ExecuteTransaction { chain, from: address, transaction: call },
            );
        }
        Some(Connection::Owns { from }) => {
            let own_tx = match payload {
                SafePayload::Own(tx) => tx,
                SafePayload::Call(call) => {
                    SafeTransactionData::from_meta(&call, resolved_nonce(nonces, address)?)
                }
            };
            let safe_options = options.safes.get(&address).cloned().unwrap_or_default();
            let owner = from.address;
            if threshold == Some(1) && !safe_options.propose_only {
                // One signature suffices and the owner is the sender, so the
                // pre-approved signature shape clears checkSignatures.
                let data = ISafe::execTransactionCall {
                    to: own_tx.to,
                    value: own_tx.value,
                    data: own_tx.data.clone(),
                    operation: own_tx.operation as u8,
                    safeTxGas: own_tx.safe_tx_gas,
                    baseGas: own_tx.base_gas,
                    gasPrice: own_tx.gas_price,
                    gasToken: own_tx.gas_token,
                    refundReceiver: own_tx.refund_receiver,
                    signatures: pre_approved_signature(owner),
                }
                .abi_encode();
                plan.insert(
                    0,
                    ExecutionAction::ExecuteTransaction {
                        chain,
                        from: owner,
                        transaction: MetaTransaction::call(address, U256::ZERO, data.into()),
                    },
                );
            } else {
                let action = if safe_options.propose_only {
                    ExecutionAction::ProposeTransaction {
                        chain,
                        safe: address,
                        transaction: own_tx,
                        proposer: None,
                        signature: None,
                    }
                } else {
                    ExecutionAction::SafeTransaction {
                        chain,
                        safe: address,
                        transaction: own_tx,
                        proposer: None,
                        signature: None,
                    }
                };
                plan.insert(0, action);
            }
        }
        Some(Connection::IsEnabled { from }) => {
            // Module execution bypasses signatures entirely.
            let inner = match payload {
                SafePayload::Own(tx) => tx.to_meta(),
                SafePayload::Call(call) => call,
            };
            let data = ISafe::execTransactionFromModuleCall {
                to: inner.to,
                value: inner.value,
                data: inner.data.clone(),
                operation: inner.operation as u8,
            }
            .abi_encode();
            plan.insert(
                0,
                ExecutionAction::ExecuteTransaction {
                    chain,
                    from: from.address,
                    transaction: MetaTransaction::call(address, U256::ZERO, data.into()),
                },
            );
        }
        Some(Connection::IsMember { .. }) => {
            return Err(RouteError::InvalidUpstreamConnection {
                index,
                at: wp.account.prefixed_address(),
            })
        }
    }
    Ok(())
}

/// A Roles hop re-scopes the module call under a role. The head must be the
/// module execution produced by the downstream hop; its unwrapped call is
/// re-encoded as `execTransactionWithRole` from the member.
fn plan_as_roles(
    plan: &mut ExecutionPlan,
    waypoints: &[Waypoint],
    index: usize,
    options: &PlanOptions,
) -> Result<(), RouteError> {
    let wp = &waypoints[index];
    let at = wp.account.prefixed_address();
    let Account::Roles { address, chain, version, default_role: module_default, .. } =
        &wp.account
    else {
        return Err(RouteError::Internal("roles hop on a non-roles account"));
    };
    let Some(Connection::IsMember { from: member, roles, default_role }) = &wp.connection else {
        return Err(RouteError::InvalidUpstreamConnection { index, at });
    };
    let downstream_ok = waypoints
        .get(index + 1)
        .map(|next| {
            matches!(next.connection, Some(Connection::IsEnabled { .. }))
                && matches!(next.account, Account::Safe { .. } | Account::Delay { .. })
        })
        .unwrap_or(false);
    if !downstream_ok {
        return Err(RouteError::InvalidDownstreamConnection { index, at });
    }

    let role = options
        .roles
        .get(address)
        .or(default_role.as_ref())
        .or(module_default.as_ref())
        .or_else(|| roles.first())
        .ok_or(RouteError::NoRoleAvailable(*member))?
        .clone();

    let head = plan.remove(0);
    let ExecutionAction::ExecuteTransaction { from, transaction: module_call, .. } = head else {
        return Err(RouteError::Internal("roles hop expects a module execution head"));
    };
    if from != *address {
        return Err(RouteError::Internal("roles hop head is not from the modifier"));
    }
    let inner = ISafe::execTransactionFromModuleCall::abi_decode(&module_call.data, true)
        .map_err(|_| RouteError::Internal("roles hop could not unwrap the module call"))?;

    // shouldRevert is always set: a silently-skipped call must fail the
    // whole transaction, not report success.
    let data = match version {
        RolesVersion::V1 => IRolesV1::execTransactionWithRoleCall {
            to: inner.to,
            value: inner.value,
            data: inner.data.clone(),
            operation: inner.operation,
            role: parse_role_index(&role)?,
            shouldRevert: true,
        }
        .abi_encode(),
        RolesVersion::V2 => IRolesV2::execTransactionWithRoleCall {
            to: inner.to,
            value: inner.value,
            data: inner.data.clone(),
            operation: inner.operation,
            roleKey: encode_role_key(&role)?,
            shouldRevert: true,
        }
        .abi_encode(),
    };
    plan.insert(
        0,
        ExecutionAction::ExecuteTransaction {
            chain: *chain,
            from: member.address,
            transaction: MetaTransaction::call(*address, U256::ZERO, data.into()),
        },
    );
    Ok(())
}

/// A Delay hop turns the module call into its two-phase form: queue, then
/// release. The plan encodes both legs; waiting out the cooldown between
/// them is the caller's responsibility.
fn plan_as_delay(
    plan: &mut ExecutionPlan,
    wp: &Waypoint,
    address: Address,
    chain: ChainId,
    index: usize,
) -> Result<(), RouteError> {
    let at = wp.account.prefixed_address();
    let upstream = match &wp.connection {
        Some(Connection::IsEnabled { from }) => *from,
        Some(_) => return Err(RouteError::InvalidUpstreamConnection { index, at }),
        None => {
            return Err(RouteError::InvalidRoute(
                "a delay modifier cannot initiate a route".to_string(),
            ))
        }
    };

    let head = plan.remove(0);
    let ExecutionAction::ExecuteTransaction { from, transaction: module_call, .. } = head else {
        return Err(RouteError::Internal("delay hop expects a module execution head"));
    };
    if from != address {
        return Err(RouteError::Internal("delay hop head is not from the modifier"));
    }
    let inner = ISafe::execTransactionFromModuleCall::abi_decode(&module_call.data, true)
        .map_err(|_| RouteError::Internal("delay hop could not unwrap the module call"))?;

    let release = IDelay::executeNextTxCall {
        to: inner.to,
        value: inner.value,
        data: inner.data.clone(),
        operation: inner.operation,
    }
    .abi_encode();
    let queue = ISafe::execTransactionFromModuleCall {
        to: inner.to,
        value: inner.value,
        data: inner.data,
        operation: inner.operation,
    }
    .abi_encode();

    plan.insert(
        0,
        ExecutionAction::ExecuteTransaction {
            chain,
            from: upstream.address,
            transaction: MetaTransaction::call(address, U256::ZERO, release.into()),
        },
    );
    plan.insert(
        0,
        ExecutionAction::ExecuteTransaction {
            chain,
            from: upstream.address,
            transaction: MetaTransaction::call(address, U256::ZERO, queue.into()),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisend::MULTISEND_130;
    use crate::router::routes::Operation;
    use alloy_primitives::address;

    const CHAIN: ChainId = 100;

    fn eoa() -> Account {
        Account::eoa(address!("1111111111111111111111111111111111111111"))
    }

    fn safe(n: u8, threshold: u64) -> Account {
        Account::safe(CHAIN, Address::from([n; 20]), Some(threshold))
    }

    fn roles_v2(n: u8) -> Account {
        Account::roles(CHAIN, Address::from([n; 20]), RolesVersion::V2, vec![])
    }

    fn payload() -> MetaTransaction {
        MetaTransaction::call(
            address!("00000000000000000000000000000000000000ff"),
            U256::from(5),
            Bytes::from_static(&[0xca, 0xfe]),
        )
    }

    fn owns(from: &Account) -> Connection {
        Connection::Owns { from: from.prefixed_address() }
    }

    fn enabled(from: &Account) -> Connection {
        Connection::IsEnabled { from: from.prefixed_address() }
    }

    fn member(from: &Account, roles: &[&str]) -> Connection {
        Connection::IsMember {
            from: from.prefixed_address(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            default_role: None,
        }
    }

    fn nonces(entries: &[(Address, u64)]) -> BTreeMap<Address, u64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn single_sig_safe_executes_directly_from_the_owner() {
        let owner = eoa();
        let vault = safe(2, 1);
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(vault.clone(), owns(&owner)),
        ])
        .unwrap();
        let plan = plan_route(
            &payload(),
            &route,
            &PlanOptions::default(),
            &nonces(&[(vault.address(), 3)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        let ExecutionAction::ExecuteTransaction { from, transaction, chain } = &plan[0] else {
            panic!("expected a direct execution, got {:?}", plan[0]);
        };
        assert_eq!(*chain, CHAIN);
        assert_eq!(*from, owner.address());
        assert_eq!(transaction.to, vault.address());

        let call = ISafe::execTransactionCall::abi_decode(&transaction.data, true).unwrap();
        assert_eq!(call.to, payload().to);
        assert_eq!(call.value, payload().value);
        assert_eq!(call.signatures, pre_approved_signature(owner.address()));
    }

    #[test]
    fn high_threshold_safe_signs_then_proposes() {
        let owner = eoa();
        let vault = safe(2, 3);
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(vault.clone(), owns(&owner)),
        ])
        .unwrap();
        let plan = plan_route(
            &payload(),
            &route,
            &PlanOptions::default(),
            &nonces(&[(vault.address(), 9)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert!(matches!(
            &plan[0],
            ExecutionAction::SignTypedData { from, .. } if *from == owner.address()
        ));
        let ExecutionAction::SafeTransaction { transaction, proposer, signature, .. } = &plan[1]
        else {
            panic!("expected a pending safe transaction, got {:?}", plan[1]);
        };
        assert_eq!(transaction.nonce, 9);
        assert_eq!(*proposer, Some(owner.address()));
        assert!(signature.is_none());
    }

    #[test]
    fn propose_only_forces_a_proposal_even_at_threshold_one() {
        let owner = eoa();
        let vault = safe(2, 1);
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(vault.clone(), owns(&owner)),
        ])
        .unwrap();
        let mut options = PlanOptions::default();
        options.safes.insert(
            vault.address(),
            SafeOptions { propose_only: true, nonce: NonceStrategy::default() },
        );
        let plan = plan_route(&payload(), &route, &options, &nonces(&[(vault.address(), 0)]))
            .unwrap();
        assert!(matches!(plan[1], ExecutionAction::ProposeTransaction { .. }));
    }

    #[test]
    fn direct_member_reaches_the_roles_modifier_in_one_action() {
        let member_account = eoa();
        let modifier = roles_v2(3);
        let avatar = safe(4, 1);
        let route = Route::new(vec![
            Waypoint::start(member_account.clone()),
            Waypoint::hop(modifier.clone(), member(&member_account, &["admin"])),
            Waypoint::hop(avatar.clone(), enabled(&modifier)),
        ])
        .unwrap();
        let plan =
            plan_route(&payload(), &route, &PlanOptions::default(), &nonces(&[])).unwrap();

        assert_eq!(plan.len(), 1);
        let ExecutionAction::ExecuteTransaction { from, transaction, .. } = &plan[0] else {
            panic!("expected a direct execution, got {:?}", plan[0]);
        };
        assert_eq!(*from, member_account.address());
        assert_eq!(transaction.to, modifier.address());

        let call =
            IRolesV2::execTransactionWithRoleCall::abi_decode(&transaction.data, true).unwrap();
        assert_eq!(call.to, payload().to);
        assert_eq!(call.value, payload().value);
        assert_eq!(call.data.as_ref(), payload().data.as_ref());
        assert_eq!(call.operation, Operation::Call as u8);
        assert_eq!(call.roleKey, encode_role_key("admin").unwrap());
        assert!(call.shouldRevert);
    }

    #[test]
    fn safe_member_route_wraps_the_role_call_in_exec_transaction() {
        let owner = eoa();
        let pilot = safe(2, 1);
        let modifier = roles_v2(3);
        let avatar = safe(4, 1);
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(pilot.clone(), owns(&owner)),
            Waypoint::hop(modifier.clone(), member(&pilot, &["1"])),
            Waypoint::hop(avatar, enabled(&modifier)),
        ])
        .unwrap();
        let plan = plan_route(
            &payload(),
            &route,
            &PlanOptions::default(),
            &nonces(&[(pilot.address(), 0)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        let ExecutionAction::ExecuteTransaction { from, transaction, .. } = &plan[0] else {
            panic!("expected a direct execution, got {:?}", plan[0]);
        };
        assert_eq!(*from, owner.address());
        assert_eq!(transaction.to, pilot.address());

        let exec = ISafe::execTransactionCall::abi_decode(&transaction.data, true).unwrap();
        assert_eq!(exec.to, modifier.address());
        let role_call =
            IRolesV2::execTransactionWithRoleCall::abi_decode(&exec.data, true).unwrap();
        assert_eq!(role_call.to, payload().to);
        assert_eq!(role_call.data.as_ref(), payload().data.as_ref());
    }

    #[test]
    fn owning_safe_pre_approves_the_downstream_hash() {
        let pilot = safe(2, 1);
        let treasury = safe(4, 2);
        let route = Route::new(vec![
            Waypoint::start(pilot.clone()),
            Waypoint::hop(treasury.clone(), owns(&pilot)),
        ])
        .unwrap();
        let plan = plan_route(
            &payload(),
            &route,
            &PlanOptions::default(),
            &nonces(&[(treasury.address(), 11)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 2);
        let ExecutionAction::ExecuteTransaction { from, transaction, .. } = &plan[0] else {
            panic!("expected the approval leg, got {:?}", plan[0]);
        };
        assert_eq!(*from, pilot.address());
        assert_eq!(transaction.to, treasury.address());

        let ExecutionAction::SafeTransaction {
            transaction: pending, proposer, signature, chain, safe: downstream,
        } = &plan[1]
        else {
            panic!("expected the pending downstream transaction, got {:?}", plan[1]);
        };
        assert_eq!(*proposer, Some(pilot.address()));
        assert_eq!(
            signature.as_ref().unwrap(),
            &pre_approved_signature(pilot.address())
        );

        let approve = ISafe::approveHashCall::abi_decode(&transaction.data, true).unwrap();
        assert_eq!(
            approve.hashToApprove,
            safe_transaction_hash(*chain, *downstream, pending)
        );
    }

    #[test]
    fn delay_hop_emits_queue_and_release_legs() {
        let owner = eoa();
        let timelock = Account::delay(CHAIN, Address::from([7; 20]));
        let avatar = safe(4, 1);
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(timelock.clone(), enabled(&owner)),
            Waypoint::hop(avatar, enabled(&timelock)),
        ])
        .unwrap();
        let plan =
            plan_route(&payload(), &route, &PlanOptions::default(), &nonces(&[])).unwrap();

        assert_eq!(plan.len(), 2);
        for action in &plan {
            let ExecutionAction::ExecuteTransaction { from, transaction, .. } = action else {
                panic!("expected execute actions, got {action:?}");
            };
            assert_eq!(*from, owner.address());
            assert_eq!(transaction.to, timelock.address());
        }
        let ExecutionAction::ExecuteTransaction { transaction: queue_leg, .. } = &plan[0] else {
            unreachable!()
        };
        let queued =
            ISafe::execTransactionFromModuleCall::abi_decode(&queue_leg.data, true).unwrap();
        assert_eq!(queued.to, payload().to);

        let ExecutionAction::ExecuteTransaction { transaction: release_leg, .. } = &plan[1]
        else {
            unreachable!()
        };
        let released = IDelay::executeNextTxCall::abi_decode(&release_leg.data, true).unwrap();
        assert_eq!(released.to, payload().to);
        assert_eq!(released.data.as_ref(), payload().data.as_ref());
    }

    #[test]
    fn avatar_must_be_a_safe() {
        let owner = eoa();
        let timelock = Account::delay(CHAIN, Address::from([7; 20]));
        let route = Route::new(vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(timelock, enabled(&owner)),
        ])
        .unwrap();
        let err =
            plan_route(&payload(), &route, &PlanOptions::default(), &nonces(&[])).unwrap_err();
        assert!(matches!(err, RouteError::InvalidRoute(_)));
    }

    #[test]
    fn roles_hop_rejects_a_non_module_downstream() {
        let member_account = eoa();
        let modifier = roles_v2(3);
        let vault = safe(4, 1);
        let route = Route::new(vec![
            Waypoint::start(member_account.clone()),
            Waypoint::hop(modifier.clone(), member(&member_account, &["1"])),
            Waypoint::hop(vault.clone(), owns(&modifier)),
        ])
        .unwrap();
        let err = plan_route(
            &payload(),
            &route,
            &PlanOptions::default(),
            &nonces(&[(vault.address(), 0)]),
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::InvalidDownstreamConnection { .. }));
    }

    #[test]
    fn member_edge_into_a_safe_is_rejected() {
        let member_account = eoa();
        let vault = safe(2, 1);
        let route = Route::new(vec![
            Waypoint::start(member_account.clone()),
            Waypoint::hop(vault, member(&member_account, &["1"])),
        ])
        .unwrap();
        let err =
            plan_route(&payload(), &route, &PlanOptions::default(), &nonces(&[])).unwrap_err();
        assert!(matches!(err, RouteError::InvalidUpstreamConnection { .. }));
    }

    #[tokio::test]
    async fn planner_prefers_the_roles_hop_batching_candidates() {
        let member_account = eoa();
        let modifier = Account::roles(
            CHAIN,
            Address::from([3; 20]),
            RolesVersion::V2,
            vec![MULTISEND_130],
        );
        let avatar = safe(4, 1);
        let route = Route::new(vec![
            Waypoint::start(member_account.clone()),
            Waypoint::hop(modifier.clone(), member(&member_account, &["ops"])),
            Waypoint::hop(avatar, enabled(&modifier)),
        ])
        .unwrap();

        // No network access needed: thresholds are present, no OWNS hops.
        let planner = Planner::new(
            Arc::new(RpcRegistry::new()),
            Arc::new(RelayClient::new()),
        );
        let calls = [payload(), payload()];
        let plan = planner
            .plan(&calls, &route, &PlanOptions::default())
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        let ExecutionAction::ExecuteTransaction { transaction, .. } = &plan[0] else {
            panic!("expected a direct execution");
        };
        let role_call =
            IRolesV2::execTransactionWithRoleCall::abi_decode(&transaction.data, true).unwrap();
        assert_eq!(role_call.to, MULTISEND_130);
        assert_eq!(role_call.operation, Operation::DelegateCall as u8);
    }
}
