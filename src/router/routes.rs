// Route types
// The account/connection/waypoint data model and the validating Route
// constructor. Routes are immutable value objects; the planner never
// mutates one.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::addresses::PrefixedAddress;
use crate::config::ChainId;
use crate::errors::RouteError;
use crate::router::canonical::route_id;

/// Call vs. delegate-call, encoded as the Safe's operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Call),
            1 => Ok(Operation::DelegateCall),
            other => Err(format!("invalid operation byte: {other}")),
        }
    }
}

/// The atomic unit the planner wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
}

impl MetaTransaction {
    pub fn call(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data, operation: Operation::Call }
    }

    pub fn delegate_call(to: Address, data: Bytes) -> Self {
        Self { to, value: U256::ZERO, data, operation: Operation::DelegateCall }
    }
}

/// Roles modifier major version; the two wire formats are incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RolesVersion {
    V1 = 1,
    V2 = 2,
}

impl From<RolesVersion> for u8 {
    fn from(v: RolesVersion) -> u8 {
        v as u8
    }
}

impl TryFrom<u8> for RolesVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RolesVersion::V1),
            2 => Ok(RolesVersion::V2),
            other => Err(format!("invalid roles version: {other}")),
        }
    }
}

/// One of the four account kinds a route can pass through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Account {
    #[serde(rename = "EOA", rename_all = "camelCase")]
    Eoa {
        address: Address,
        prefixed_address: PrefixedAddress,
    },
    #[serde(rename = "SAFE", rename_all = "camelCase")]
    Safe {
        address: Address,
        prefixed_address: PrefixedAddress,
        chain: ChainId,
        /// Signer threshold; filled by the normalizer when absent.
        threshold: Option<u64>,
    },
    #[serde(rename = "ROLES", rename_all = "camelCase")]
    Roles {
        address: Address,
        prefixed_address: PrefixedAddress,
        chain: ChainId,
        version: RolesVersion,
        /// Batching-contract candidates registered on this modifier.
        multisend: Vec<Address>,
        /// Module-level fallback role, below any per-connection default.
        default_role: Option<String>,
    },
    #[serde(rename = "DELAY", rename_all = "camelCase")]
    Delay {
        address: Address,
        prefixed_address: PrefixedAddress,
        chain: ChainId,
    },
}

impl Account {
    pub fn eoa(address: Address) -> Self {
        Account::Eoa { address, prefixed_address: PrefixedAddress::eoa(address) }
    }

    pub fn safe(chain: ChainId, address: Address, threshold: Option<u64>) -> Self {
        Account::Safe {
            address,
            prefixed_address: PrefixedAddress::on_chain(chain, address),
            chain,
            threshold,
        }
    }

    pub fn roles(
        chain: ChainId,
        address: Address,
        version: RolesVersion,
        multisend: Vec<Address>,
    ) -> Self {
        Account::Roles {
            address,
            prefixed_address: PrefixedAddress::on_chain(chain, address),
            chain,
            version,
            multisend,
            default_role: None,
        }
    }

    pub fn delay(chain: ChainId, address: Address) -> Self {
        Account::Delay {
            address,
            prefixed_address: PrefixedAddress::on_chain(chain, address),
            chain,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Account::Eoa { address, .. }
            | Account::Safe { address, .. }
            | Account::Roles { address, .. }
            | Account::Delay { address, .. } => *address,
        }
    }

    pub fn chain(&self) -> Option<ChainId> {
        match self {
            Account::Eoa { .. } => None,
            Account::Safe { chain, .. }
            | Account::Roles { chain, .. }
            | Account::Delay { chain, .. } => Some(*chain),
        }
    }

    pub fn prefixed_address(&self) -> PrefixedAddress {
        match self {
            Account::Eoa { prefixed_address, .. }
            | Account::Safe { prefixed_address, .. }
            | Account::Roles { prefixed_address, .. }
            | Account::Delay { prefixed_address, .. } => *prefixed_address,
        }
    }

    /// Re-derives the chain-qualified address from the account's own fields.
    pub(crate) fn canonicalize(&mut self) {
        let derived = PrefixedAddress::new(self.chain(), self.address());
        match self {
            Account::Eoa { prefixed_address, .. }
            | Account::Safe { prefixed_address, .. }
            | Account::Roles { prefixed_address, .. }
            | Account::Delay { prefixed_address, .. } => *prefixed_address = derived,
        }
    }
}

/// Directed edge describing how the predecessor relates to this waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Connection {
    /// Predecessor is a signer of this Safe.
    #[serde(rename = "OWNS")]
    Owns { from: PrefixedAddress },
    /// Predecessor is an enabled module on this account.
    #[serde(rename = "IS_ENABLED")]
    IsEnabled { from: PrefixedAddress },
    /// Predecessor is a member of one of this modifier's roles.
    #[serde(rename = "IS_MEMBER", rename_all = "camelCase")]
    IsMember {
        from: PrefixedAddress,
        roles: Vec<String>,
        default_role: Option<String>,
    },
}

impl Connection {
    pub fn from(&self) -> PrefixedAddress {
        match self {
            Connection::Owns { from }
            | Connection::IsEnabled { from }
            | Connection::IsMember { from, .. } => *from,
        }
    }

    pub(crate) fn set_from(&mut self, new_from: PrefixedAddress) {
        match self {
            Connection::Owns { from }
            | Connection::IsEnabled { from }
            | Connection::IsMember { from, .. } => *from = new_from,
        }
    }
}

/// One hop of a route. The first waypoint (the starting point) carries no
/// connection; every later one must.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub account: Account,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
}

impl Waypoint {
    pub fn start(account: Account) -> Self {
        Self { account, connection: None }
    }

    pub fn hop(account: Account, connection: Connection) -> Self {
        Self { account, connection: Some(connection) }
    }
}

/// An ordered path from an initiator to the avatar it acts on. `id`,
/// `initiator` and `avatar` are derived from the waypoints, never set
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub initiator: PrefixedAddress,
    pub avatar: PrefixedAddress,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, RouteError> {
        validate_waypoints(&waypoints)?;
        let initiator = waypoints[0].account.prefixed_address();
        let avatar = waypoints[waypoints.len() - 1].account.prefixed_address();
        Ok(Self { id: route_id(&waypoints), initiator, avatar, waypoints })
    }
}

/// Structural route invariants, checked once at construction and again after
/// normalization rather than scattered through the planner.
pub(crate) fn validate_waypoints(waypoints: &[Waypoint]) -> Result<(), RouteError> {
    if waypoints.len() < 2 {
        return Err(RouteError::InvalidRoute(
            "a route needs at least an initiator and an avatar".to_string(),
        ));
    }
    if waypoints[0].connection.is_some() {
        return Err(RouteError::InvalidRoute(
            "the starting point must not carry a connection".to_string(),
        ));
    }
    for (index, pair) in waypoints.windows(2).enumerate() {
        let (prev, wp) = (&pair[0], &pair[1]);
        let index = index + 1;
        if matches!(wp.account, Account::Eoa { .. }) {
            return Err(RouteError::InvalidRoute(format!(
                "EOA at waypoint {index}: an EOA can only initiate a route"
            )));
        }
        let Some(connection) = &wp.connection else {
            return Err(RouteError::InvalidRoute(format!(
                "waypoint {index} is missing its connection"
            )));
        };
        if connection.from() != prev.account.prefixed_address() {
            return Err(RouteError::InvalidRoute(format!(
                "waypoint {index}: connection.from {} does not match predecessor {}",
                connection.from(),
                prev.account.prefixed_address()
            )));
        }
    }
    Ok(())
}
