// ABI surface and Safe transaction encoding
// sol!-generated call types for the Safe, MultiSend, Roles and Delay
// contracts, EIP-712 hashing of Safe transactions, the pre-approved
// signature constant, and role identifier encoding.

use alloy_primitives::{b256, keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ChainId;
use crate::errors::RouteError;
use crate::router::routes::{MetaTransaction, Operation};

sol! {
    /// Safe v1.3+ execution surface. `execTransactionFromModule` doubles as
    /// the queueing entry point of the Delay modifier (same selector).
    interface ISafe {
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);

        function approveHash(bytes32 hashToApprove) external;

        function getThreshold() external view returns (uint256 threshold);

        function nonce() external view returns (uint256 nonce);

        function execTransactionFromModule(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation
        ) external returns (bool success);
    }

    interface IMultiSend {
        function multiSend(bytes memory transactions) external payable;
    }

    /// Roles modifier v1: roles are 16-bit indices.
    interface IRolesV1 {
        function execTransactionWithRole(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint16 role,
            bool shouldRevert
        ) external returns (bool success);
    }

    /// Roles modifier v2: roles are 32-byte keys.
    interface IRolesV2 {
        function execTransactionWithRole(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            bytes32 roleKey,
            bool shouldRevert
        ) external returns (bool success);
    }

    interface IDelay {
        function executeNextTx(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation
        ) external;
    }
}

/// EIP-712 type hash for the SafeTx struct.
/// keccak256("SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)")
pub const SAFE_TX_TYPEHASH: B256 =
    b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8");

/// EIP-712 domain type hash for Safe v1.3+ domains.
/// keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")
pub const DOMAIN_SEPARATOR_TYPEHASH: B256 =
    b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218");

/// A fully-populated Safe transaction, ready to be hashed, signed or
/// proposed. Gas fields default to zero and the zero address, which the Safe
/// contract treats as "no refund".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransactionData {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
}

impl SafeTransactionData {
    pub fn from_meta(tx: &MetaTransaction, nonce: u64) -> Self {
        Self {
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
            operation: tx.operation,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    /// The wrapped call, without the Safe transaction envelope.
    pub fn to_meta(&self) -> MetaTransaction {
        MetaTransaction {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation,
        }
    }
}

pub fn domain_separator(chain: ChainId, safe: Address) -> B256 {
    keccak256(
        (DOMAIN_SEPARATOR_TYPEHASH, U256::from(chain), safe)
            .abi_encode()
            .as_slice(),
    )
}

/// EIP-712 hash of a Safe transaction: `keccak256(0x1901 || domain || struct)`.
pub fn safe_transaction_hash(chain: ChainId, safe: Address, tx: &SafeTransactionData) -> B256 {
    let struct_hash = keccak256(
        (
            SAFE_TX_TYPEHASH,
            tx.to,
            tx.value,
            keccak256(&tx.data),
            U256::from(tx.operation as u8),
            tx.safe_tx_gas,
            tx.base_gas,
            tx.gas_price,
            tx.gas_token,
            tx.refund_receiver,
            U256::from(tx.nonce),
        )
            .abi_encode()
            .as_slice(),
    );
    let mut buf = [0u8; 66];
    buf[0] = 0x19;
    buf[1] = 0x01;
    buf[2..34].copy_from_slice(domain_separator(chain, safe).as_slice());
    buf[34..66].copy_from_slice(struct_hash.as_slice());
    keccak256(buf)
}

/// The constant-shape signature a Safe accepts from an owner that has already
/// approved the hash (or is the sender of the execution itself): the owner
/// address left-padded to 32 bytes, 32 zero bytes, and a final `0x01`.
pub fn pre_approved_signature(owner: Address) -> Bytes {
    let mut sig = [0u8; 65];
    sig[12..32].copy_from_slice(owner.as_slice());
    sig[64] = 0x01;
    Bytes::copy_from_slice(&sig)
}

/// EIP-712 payload for `eth_signTypedData_v4` over a Safe transaction.
pub fn safe_typed_data(chain: ChainId, safe: Address, tx: &SafeTransactionData) -> Value {
    json!({
        "types": {
            "EIP712Domain": [
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" },
            ],
            "SafeTx": [
                { "name": "to", "type": "address" },
                { "name": "value", "type": "uint256" },
                { "name": "data", "type": "bytes" },
                { "name": "operation", "type": "uint8" },
                { "name": "safeTxGas", "type": "uint256" },
                { "name": "baseGas", "type": "uint256" },
                { "name": "gasPrice", "type": "uint256" },
                { "name": "gasToken", "type": "address" },
                { "name": "refundReceiver", "type": "address" },
                { "name": "nonce", "type": "uint256" },
            ],
        },
        "primaryType": "SafeTx",
        "domain": {
            "chainId": chain,
            "verifyingContract": format!("{:#x}", safe),
        },
        "message": {
            "to": format!("{:#x}", tx.to),
            "value": tx.value.to_string(),
            "data": format!("{:#x}", tx.data),
            "operation": tx.operation as u8,
            "safeTxGas": tx.safe_tx_gas.to_string(),
            "baseGas": tx.base_gas.to_string(),
            "gasPrice": tx.gas_price.to_string(),
            "gasToken": format!("{:#x}", tx.gas_token),
            "refundReceiver": format!("{:#x}", tx.refund_receiver),
            "nonce": tx.nonce,
        },
    })
}

/// Roles v1 identifies roles by a 16-bit index, written in decimal.
pub fn parse_role_index(role: &str) -> Result<u16, RouteError> {
    role.parse::<u16>()
        .map_err(|_| RouteError::InvalidRole(role.to_string()))
}

/// Roles v2 identifies roles by a 32-byte key: either 0x-prefixed 32-byte
/// hex, or an ASCII label of at most 32 bytes, right-padded with zeros.
pub fn encode_role_key(role: &str) -> Result<B256, RouteError> {
    if let Some(stripped) = role.strip_prefix("0x") {
        let raw = hex::decode(stripped).map_err(|_| RouteError::InvalidRole(role.to_string()))?;
        if raw.len() != 32 {
            return Err(RouteError::InvalidRole(role.to_string()));
        }
        return Ok(B256::from_slice(&raw));
    }
    if role.is_empty() || role.len() > 32 || !role.is_ascii() {
        return Err(RouteError::InvalidRole(role.to_string()));
    }
    let mut key = [0u8; 32];
    key[..role.len()].copy_from_slice(role.as_bytes());
    Ok(B256::from(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn safe_tx_typehash_matches_canonical_signature() {
        let computed = keccak256(
            "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)"
        );
        assert_eq!(computed, SAFE_TX_TYPEHASH);
    }

    #[test]
    fn domain_typehash_matches_canonical_signature() {
        let computed = keccak256("EIP712Domain(uint256 chainId,address verifyingContract)");
        assert_eq!(computed, DOMAIN_SEPARATOR_TYPEHASH);
    }

    #[test]
    fn pre_approved_signature_layout() {
        let owner = address!("00000000000000000000000000000000000000aa");
        let sig = pre_approved_signature(owner);
        assert_eq!(sig.len(), 65);
        assert_eq!(&sig[..12], &[0u8; 12]);
        assert_eq!(&sig[12..32], owner.as_slice());
        assert_eq!(&sig[32..64], &[0u8; 32]);
        assert_eq!(sig[64], 0x01);
    }

    #[test]
    fn transaction_hash_depends_on_every_field() {
        let safe = address!("00000000000000000000000000000000000000a1");
        let base = SafeTransactionData::from_meta(
            &MetaTransaction::call(
                address!("00000000000000000000000000000000000000b2"),
                U256::ZERO,
                Bytes::from_static(&[0xde, 0xad]),
            ),
            7,
        );
        let hash = safe_transaction_hash(100, safe, &base);
        let mut bumped = base.clone();
        bumped.nonce = 8;
        assert_ne!(hash, safe_transaction_hash(100, safe, &bumped));
        assert_ne!(hash, safe_transaction_hash(1, safe, &base));
    }

    #[test]
    fn role_key_pads_ascii_labels() {
        let key = encode_role_key("admin").unwrap();
        assert_eq!(&key[..5], b"admin");
        assert_eq!(&key[5..], &[0u8; 27]);
        assert!(encode_role_key(&"x".repeat(33)).is_err());
    }

    #[test]
    fn role_key_accepts_exact_hex() {
        let hexkey = format!("0x{}", "11".repeat(32));
        assert_eq!(encode_role_key(&hexkey).unwrap(), B256::from([0x11; 32]));
        assert!(encode_role_key("0x1234").is_err());
        assert!(parse_role_index("1").is_ok());
        assert!(parse_role_index("role").is_err());
    }
}
