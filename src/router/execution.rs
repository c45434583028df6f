// Plan execution runtime
// Drives a finished plan action by action against the live transports,
// appending one output per completed action. Execution is strictly
// sequential (each action may consume the previous output) and resumable
// from any recorded prefix.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Bytes;
use tracing::{info, warn};

use crate::encoding::safe_transaction_hash;
use crate::errors::RouteError;
use crate::router::planner::{ExecutionAction, ExecutionPlan};
use crate::transport::jsonrpc::RpcRegistry;
use crate::transport::relay::RelayClient;

/// Outputs produced so far, one 0x-hex entry per completed action: a
/// transaction hash, a signature, or a Safe transaction hash. Owned by the
/// caller; a single writer at a time.
pub type ExecutionState = Vec<String>;

pub struct ExecutionEngine {
    rpc: Arc<RpcRegistry>,
    relay: Arc<RelayClient>,
}

impl ExecutionEngine {
    pub fn new(rpc: Arc<RpcRegistry>, relay: Arc<RelayClient>) -> Self {
        Self { rpc, relay }
    }

    /// Runs `plan` starting at `state.len()`. On failure the error is
    /// returned and `state` keeps the completed prefix; re-invoking with the
    /// same arguments resumes where the run stopped.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        state: &mut ExecutionState,
    ) -> Result<(), RouteError> {
        if state.len() > plan.len() {
            return Err(RouteError::InvalidState(format!(
                "{} outputs recorded for a plan of {} actions",
                state.len(),
                plan.len()
            )));
        }
        for index in state.len()..plan.len() {
            let output = match self.run_action(plan, state, index).await {
                Ok(output) => output,
                Err(err) => {
                    warn!(step = index, error = %err, "plan execution aborted");
                    return Err(err);
                }
            };
            state.push(output);
        }
        info!(actions = plan.len(), "plan executed");
        Ok(())
    }

    async fn run_action(
        &self,
        plan: &ExecutionPlan,
        state: &ExecutionState,
        index: usize,
    ) -> Result<String, RouteError> {
        match &plan[index] {
            ExecutionAction::ExecuteTransaction { chain, from, transaction } => {
                let client = self.rpc.client(*chain)?;
                let hash = client
                    .send_transaction(*from, transaction.to, transaction.value, &transaction.data)
                    .await?;
                info!(step = index, hash = %hash, "transaction submitted");
                Ok(format!("{hash:#x}"))
            }
            ExecutionAction::SignTypedData { chain, from, data } => {
                let client = self.rpc.client(*chain)?;
                let signature = normalize_recovery_byte(
                    client.sign_typed_data(*from, data).await?,
                );
                Ok(format!("{signature:#x}"))
            }
            ExecutionAction::SafeTransaction { chain, safe, transaction, proposer, signature }
            | ExecutionAction::ProposeTransaction {
                chain, safe, transaction, proposer, signature,
            } => {
                let signature = match signature {
                    Some(signature) => signature.clone(),
                    // The planner left the signature pending: it is the
                    // output of the action right before this one.
                    None => spliced_signature(state, index)?,
                };
                let proposer = proposer.ok_or_else(|| {
                    RouteError::InvalidState(format!("action {index} has no proposer"))
                })?;
                let hash = safe_transaction_hash(*chain, *safe, transaction);
                self.relay
                    .propose(*chain, *safe, transaction, hash, proposer, &signature)
                    .await?;
                info!(step = index, safe = %safe, nonce = transaction.nonce, "proposal relayed");
                Ok(format!("{hash:#x}"))
            }
        }
    }
}

fn spliced_signature(state: &ExecutionState, index: usize) -> Result<Bytes, RouteError> {
    let previous = index
        .checked_sub(1)
        .and_then(|i| state.get(i))
        .ok_or(RouteError::MissingSignature(index))?;
    Bytes::from_str(previous).map_err(|_| RouteError::MissingSignature(index))
}

/// Signers disagree on the recovery byte convention; the Safe contracts
/// expect v of 27 or 28 for ECDSA signatures.
fn normalize_recovery_byte(signature: Bytes) -> Bytes {
    let mut raw = signature.to_vec();
    if let Some(v) = raw.last_mut() {
        if *v < 2 {
            *v += 27;
        }
    }
    Bytes::from(raw)
}
