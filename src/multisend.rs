// Multisend batching
// Folds independent calls into one delegate-called multiSend payload and
// picks a compatible batching contract for it.

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::SolCall;

use crate::encoding::IMultiSend;
use crate::errors::RouteError;
use crate::router::routes::{MetaTransaction, Operation};

// Canonical Safe deployments. The 1.3.0 generation has two address variants
// depending on the deployment factory.
pub const MULTISEND_141: Address = address!("38869bf66a61cF6bDB996A6aE40D5853Fd43B526");
pub const MULTISEND_130: Address = address!("A238CBeb142c10Ef7Ad8442C6D1f9E89e07e7761");
pub const MULTISEND_130_ALT: Address = address!("998739BFdAAdde7C933B942a68053933098f9EDa");
pub const MULTISEND_CALL_ONLY_141: Address =
    address!("9641d764fc13c8B624c04430C7356C1C7C8102e2");
pub const MULTISEND_CALL_ONLY_130: Address =
    address!("40A2aCCbd92BCA938b02010E17A5b8929b49130D");
pub const MULTISEND_CALL_ONLY_130_ALT: Address =
    address!("A1dabEF33b3B82c7814B6D82A79e50F4AC44102B");

pub static KNOWN_MULTISEND: &[Address] = &[MULTISEND_141, MULTISEND_130, MULTISEND_130_ALT];
pub static KNOWN_MULTISEND_CALL_ONLY: &[Address] = &[
    MULTISEND_CALL_ONLY_141,
    MULTISEND_CALL_ONLY_130,
    MULTISEND_CALL_ONLY_130_ALT,
];

/// Packed multiSend payload: `(operation:1 | to:20 | value:32 | len:32 | data)`
/// per transaction, in input order. Order is significant and preserved.
fn encode_transactions(transactions: &[MetaTransaction]) -> Vec<u8> {
    let mut buf = Vec::new();
    for tx in transactions {
        buf.push(tx.operation as u8);
        buf.extend_from_slice(tx.to.as_slice());
        buf.extend_from_slice(&tx.value.to_be_bytes::<32>());
        buf.extend_from_slice(&U256::from(tx.data.len()).to_be_bytes::<32>());
        buf.extend_from_slice(&tx.data);
    }
    buf
}

/// Picks the batching contract. Preference order: the first caller-supplied
/// candidate in the applicable known set, then the first candidate as-is
/// (custom deployments), then the hard-coded default. A batch containing a
/// delegate call must never land on a call-only contract: a delegate call
/// executed from a call-only batcher would run in the wrong storage context.
fn select_target(preferred: &[Address], needs_full: bool) -> Result<Address, RouteError> {
    if needs_full {
        if let Some(hit) = preferred.iter().find(|a| KNOWN_MULTISEND.contains(a)) {
            return Ok(*hit);
        }
        match preferred.first() {
            Some(first) if KNOWN_MULTISEND_CALL_ONLY.contains(first) => {
                Err(RouteError::IncompatibleBatchTarget)
            }
            Some(first) => Ok(*first),
            None => Ok(MULTISEND_141),
        }
    } else {
        if let Some(hit) = preferred
            .iter()
            .find(|a| KNOWN_MULTISEND_CALL_ONLY.contains(a) || KNOWN_MULTISEND.contains(a))
        {
            return Ok(*hit);
        }
        Ok(preferred.first().copied().unwrap_or(MULTISEND_CALL_ONLY_141))
    }
}

/// Folds `transactions` into a single meta-transaction. Singleton inputs are
/// returned unchanged; empty input is an error.
pub fn batch(
    transactions: &[MetaTransaction],
    preferred: &[Address],
) -> Result<MetaTransaction, RouteError> {
    match transactions {
        [] => Err(RouteError::EmptyBatch),
        [single] => Ok(single.clone()),
        many => {
            let needs_full = many
                .iter()
                .any(|tx| tx.operation == Operation::DelegateCall);
            let target = select_target(preferred, needs_full)?;
            let data = IMultiSend::multiSendCall {
                transactions: encode_transactions(many).into(),
            }
            .abi_encode();
            Ok(MetaTransaction::delegate_call(target, Bytes::from(data)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn plain_call(n: u8) -> MetaTransaction {
        MetaTransaction::call(
            Address::from([n; 20]),
            U256::from(n),
            Bytes::from(vec![n, n + 1]),
        )
    }

    #[test]
    fn empty_batch_is_an_error() {
        assert!(matches!(batch(&[], &[]), Err(RouteError::EmptyBatch)));
    }

    #[test]
    fn singleton_passes_through_unwrapped() {
        let tx = plain_call(1);
        assert_eq!(batch(&[tx.clone()], &[]).unwrap(), tx);
    }

    #[test]
    fn two_calls_produce_the_packed_multisend_payload() {
        let (a, b) = (plain_call(1), plain_call(2));
        let batched = batch(&[a.clone(), b.clone()], &[]).unwrap();
        assert_eq!(batched.operation, Operation::DelegateCall);
        assert_eq!(batched.to, MULTISEND_CALL_ONLY_141);

        let mut expected = Vec::new();
        for tx in [&a, &b] {
            expected.push(0u8);
            expected.extend_from_slice(tx.to.as_slice());
            expected.extend_from_slice(&tx.value.to_be_bytes::<32>());
            expected.extend_from_slice(&U256::from(tx.data.len()).to_be_bytes::<32>());
            expected.extend_from_slice(&tx.data);
        }
        let call = IMultiSend::multiSendCall::abi_decode(&batched.data, true).unwrap();
        assert_eq!(call.transactions.as_ref(), expected.as_slice());
    }

    #[test]
    fn batch_order_is_preserved() {
        let ab = batch(&[plain_call(1), plain_call(2)], &[]).unwrap();
        let ba = batch(&[plain_call(2), plain_call(1)], &[]).unwrap();
        assert_ne!(ab.data, ba.data);
    }

    #[test]
    fn delegate_call_batches_require_a_full_multisend() {
        let mixed = [
            plain_call(1),
            MetaTransaction::delegate_call(Address::from([9; 20]), Bytes::new()),
        ];
        let batched = batch(&mixed, &[]).unwrap();
        assert_eq!(batched.to, MULTISEND_141);

        let err = batch(&mixed, &[MULTISEND_CALL_ONLY_130]).unwrap_err();
        assert!(matches!(err, RouteError::IncompatibleBatchTarget));
    }

    #[test]
    fn preference_list_wins_when_compatible() {
        let preferred = [MULTISEND_130];
        let batched = batch(&[plain_call(1), plain_call(2)], &preferred).unwrap();
        assert_eq!(batched.to, MULTISEND_130);

        // Unknown candidates are honored as custom deployments.
        let custom = address!("00000000000000000000000000000000000000cc");
        let batched = batch(&[plain_call(1), plain_call(2)], &[custom]).unwrap();
        assert_eq!(batched.to, custom);
    }
}
