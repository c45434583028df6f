// Chain-qualified address codec
// A `PrefixedAddress` is a `(chain | none, address)` pair rendered as
// `<shortname>:0x<hex>`. The reserved `eoa` prefix marks externally-owned
// accounts, which carry no chain.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{chain_by_id, chain_by_prefix, ChainId};
use crate::errors::RouteError;

/// Pseudo-prefix for addresses that are not bound to any chain.
pub const EOA_PREFIX: &str = "eoa";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixedAddress {
    pub chain: Option<ChainId>,
    pub address: Address,
}

impl PrefixedAddress {
    pub fn new(chain: Option<ChainId>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn eoa(address: Address) -> Self {
        Self { chain: None, address }
    }

    pub fn on_chain(chain: ChainId, address: Address) -> Self {
        Self { chain: Some(chain), address }
    }
}

impl fmt::Display for PrefixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chain {
            None => write!(f, "{}:{:#x}", EOA_PREFIX, self.address),
            Some(chain) => match chain_by_id(chain) {
                Some(info) => write!(f, "{}:{:#x}", info.short_name, self.address),
                // Off-registry ids only appear on unvalidated values.
                None => write!(f, "{}:{:#x}", chain, self.address),
            },
        }
    }
}

impl FromStr for PrefixedAddress {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, raw) = s
            .split_once(':')
            .ok_or_else(|| RouteError::InvalidAddress(s.to_string()))?;
        let chain = if prefix == EOA_PREFIX {
            None
        } else {
            Some(
                chain_by_prefix(prefix)
                    .ok_or_else(|| RouteError::UnknownChainPrefix(prefix.to_string()))?
                    .chain_id,
            )
        };
        // Accepts any hex casing; the value is case-normalized from here on.
        let address =
            Address::from_str(raw).map_err(|_| RouteError::InvalidAddress(s.to_string()))?;
        Ok(Self { chain, address })
    }
}

impl Serialize for PrefixedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PrefixedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PrefixedVisitor;

        impl Visitor<'_> for PrefixedVisitor {
            type Value = PrefixedAddress;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string of the form <shortname>:0x<hex>")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: DeError,
            {
                PrefixedAddress::from_str(value).map_err(|e| DeError::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(PrefixedVisitor)
    }
}
