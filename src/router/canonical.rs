// Route canonicalization
// Derives the content-addressed route id and collapses redundant
// module-to-module pass-through hops.

use alloy_primitives::keccak256;

use crate::router::routes::{Connection, Waypoint};

fn connection_ordinal(connection: &Connection) -> u8 {
    match connection {
        Connection::Owns { .. } => 0,
        Connection::IsEnabled { .. } => 1,
        Connection::IsMember { .. } => 2,
    }
}

/// Deterministic digest over the waypoint sequence: per waypoint, the
/// connection ordinal (when present), the 8-byte big-endian chain id (zero
/// for EOAs) and the 20 raw address bytes, keccak256'd and hex-rendered.
/// Byte-identical sequences always produce the same id; this is the route's
/// primary key for dedup and caching.
pub fn route_id(waypoints: &[Waypoint]) -> String {
    let mut buf = Vec::with_capacity(waypoints.len() * 29);
    for wp in waypoints {
        if let Some(connection) = &wp.connection {
            buf.push(connection_ordinal(connection));
        }
        buf.extend_from_slice(&wp.account.chain().unwrap_or(0).to_be_bytes());
        buf.extend_from_slice(wp.account.address().as_slice());
    }
    hex::encode(keccak256(&buf))
}

/// Drops any IS_ENABLED waypoint immediately followed by another IS_ENABLED
/// waypoint: a module forwarded to another module performs no wrapping of its
/// own, so only the final node of such a chain matters. The survivor's
/// connection is re-pointed at the removed node's predecessor to keep the
/// route invariant intact.
pub fn collapse_pass_through(waypoints: Vec<Waypoint>) -> Vec<Waypoint> {
    let mut collapsed: Vec<Waypoint> = Vec::with_capacity(waypoints.len());
    for mut wp in waypoints {
        let both_pass_through = matches!(wp.connection, Some(Connection::IsEnabled { .. }))
            && matches!(
                collapsed.last().and_then(|prev| prev.connection.as_ref()),
                Some(Connection::IsEnabled { .. })
            );
        if both_pass_through {
            let removed = collapsed.pop().and_then(|prev| prev.connection);
            if let (Some(connection), Some(removed)) = (wp.connection.as_mut(), removed) {
                connection.set_from(removed.from());
            }
        }
        collapsed.push(wp);
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::routes::{Account, RolesVersion};
    use alloy_primitives::{address, Address};

    fn member() -> Account {
        Account::eoa(address!("1111111111111111111111111111111111111111"))
    }

    fn modifier(addr: Address) -> Account {
        Account::roles(100, addr, RolesVersion::V2, vec![])
    }

    fn vault(addr: Address) -> Account {
        Account::safe(100, addr, Some(1))
    }

    fn simple_route() -> Vec<Waypoint> {
        let owner = member();
        let safe = vault(address!("2222222222222222222222222222222222222222"));
        vec![
            Waypoint::start(owner.clone()),
            Waypoint::hop(safe, Connection::Owns { from: owner.prefixed_address() }),
        ]
    }

    #[test]
    fn identical_sequences_share_an_id() {
        assert_eq!(route_id(&simple_route()), route_id(&simple_route()));
    }

    #[test]
    fn any_field_change_moves_the_id() {
        let base = simple_route();

        let mut other_address = simple_route();
        other_address[1].account =
            vault(address!("2222222222222222222222222222222222222223"));
        assert_ne!(route_id(&base), route_id(&other_address));

        let mut other_connection = simple_route();
        other_connection[1].connection =
            Some(Connection::IsEnabled { from: member().prefixed_address() });
        assert_ne!(route_id(&base), route_id(&other_connection));

        let mut other_chain = simple_route();
        other_chain[1].account =
            Account::safe(10, address!("2222222222222222222222222222222222222222"), Some(1));
        assert_ne!(route_id(&base), route_id(&other_chain));
    }

    #[test]
    fn collapses_module_to_module_chains_and_repoints_from() {
        let start = member();
        let first = modifier(address!("3333333333333333333333333333333333333333"));
        let second = modifier(address!("4444444444444444444444444444444444444444"));
        let avatar = vault(address!("5555555555555555555555555555555555555555"));
        let collapsed = collapse_pass_through(vec![
            Waypoint::start(start.clone()),
            Waypoint::hop(
                first.clone(),
                Connection::IsEnabled { from: start.prefixed_address() },
            ),
            Waypoint::hop(
                second.clone(),
                Connection::IsEnabled { from: first.prefixed_address() },
            ),
            Waypoint::hop(
                avatar.clone(),
                Connection::IsEnabled { from: second.prefixed_address() },
            ),
        ]);
        // first and second collapse onto the avatar hop
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[1].account.address(), avatar.address());
        assert_eq!(
            collapsed[1].connection.as_ref().unwrap().from(),
            start.prefixed_address()
        );
    }

    #[test]
    fn leaves_non_module_chains_alone() {
        let kept = collapse_pass_through(simple_route());
        assert_eq!(kept.len(), 2);
    }
}
