// Route ranking
// Orders candidate routes by execution friction: how many transactions,
// signatures and waiting periods a traversal costs. Pure scoring, no I/O;
// ranking runs before any route is planned.

use serde::Serialize;

use crate::router::routes::{Account, Connection, Route, Waypoint};

/// Additive friction score; lower ranks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteScore {
    pub friction: u32,
    pub hops: usize,
}

fn waypoint_friction(wp: &Waypoint) -> u32 {
    match (&wp.account, &wp.connection) {
        (Account::Eoa { .. }, _) => 0,
        // A timelock costs two legs plus the cooldown in between.
        (Account::Delay { .. }, _) => 4,
        (Account::Roles { .. }, _) => 1,
        (Account::Safe { .. }, Some(Connection::IsEnabled { .. })) => 1,
        (Account::Safe { threshold, .. }, Some(Connection::Owns { .. })) => {
            match threshold {
                // One pre-approved execution.
                Some(1) => 1,
                // Off-chain signature collection per additional signer.
                Some(t) => 3 + *t as u32,
                None => 3,
            }
        }
        // Initiator Safe, or a connection the planner will reject anyway.
        (Account::Safe { .. }, _) => 1,
    }
}

pub fn score_route(route: &Route) -> RouteScore {
    RouteScore {
        friction: route.waypoints.iter().map(waypoint_friction).sum(),
        hops: route.waypoints.len(),
    }
}

/// Stable ascending order by friction, then hop count, then id, so the
/// result is fully deterministic for identical inputs.
pub fn rank_routes(routes: &[Route]) -> Vec<Route> {
    let mut ranked: Vec<Route> = routes.to_vec();
    ranked.sort_by(|a, b| {
        let (sa, sb) = (score_route(a), score_route(b));
        sa.friction
            .cmp(&sb.friction)
            .then(sa.hops.cmp(&sb.hops))
            .then(a.id.cmp(&b.id))
    });
    ranked
}
