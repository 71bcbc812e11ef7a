//! The "ROUTING" Engine - Hop-by-hop forwarding across nested subnetworks
//!
//! At every device the next hop is found in two ways:
//! 1. **Local**: the destination shares the current subnetwork, so the
//!    routing table of the current node (or of the enclosing subnetwork the
//!    device is gateway of) leads to the sibling containing it.
//! 2. **Upward**: otherwise the message heads for the parent's gateway. A
//!    device that *is* the gateway hands the decision to its parent
//!    subnetwork, which costs no hop.
//!
//! A next hop that is a subnetwork resolves to its gateway device. Hop budgets
//! are per tick; a message that runs out is parked in the current device's
//! pending queue and resumed on a later tick.

use crate::error::RoutingError;
use crate::ids::{AttackerId, CorrespondenceId, NodeId};
use crate::network::Network;
use cybsim_env::{Address, Tick};
use serde::{Deserialize, Serialize};
use tracing::trace;

// ============================================================================
// MESSAGES
// ============================================================================

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Ordinary work traffic
    Plain,

    /// Phishing lure sent to a victim
    Lure {
        attacker: AttackerId,
        effectiveness: f64,
    },

    /// Credentials flowing back to an attacker
    Credentials {
        attacker: AttackerId,
    },

    /// Command sent to a captured device
    Control {
        attacker: AttackerId,
    },
}

impl Payload {
    /// Attack payloads mark the edges they cross as malicious.
    pub fn is_malicious(&self) -> bool {
        !matches!(self, Payload::Plain)
    }

    pub fn attacker(&self) -> Option<AttackerId> {
        match *self {
            Payload::Plain => None,
            Payload::Lure { attacker, .. }
            | Payload::Credentials { attacker }
            | Payload::Control { attacker } => Some(attacker),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,

    pub source: Address,

    pub destination: Address,

    pub payload: Payload,

    /// Correspondence to report the outcome to
    pub correspondence: Option<CorrespondenceId>,

    /// Hops allowed per tick, `-1` for unlimited
    pub max_hops: i32,

    /// Hops taken since the budget was last refreshed
    pub hops_this_tick: u32,

    pub total_hops: u32,

    pub created: Tick,
}

impl Message {
    pub fn new(id: u64, source: Address, destination: Address, payload: Payload, created: Tick) -> Self {
        Self {
            id,
            source,
            destination,
            payload,
            correspondence: None,
            max_hops: -1,
            hops_this_tick: 0,
            total_hops: 0,
            created,
        }
    }

    pub fn with_correspondence(mut self, id: CorrespondenceId) -> Self {
        self.correspondence = Some(id);
        self
    }

    pub fn with_max_hops(mut self, max_hops: i32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// True when the per-tick budget is spent.
    pub fn budget_exhausted(&self) -> bool {
        self.max_hops >= 0 && self.hops_this_tick >= self.max_hops as u32
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The next device had already forwarded its allowance this tick
    Capacity { at: NodeId },

    Unroutable(RoutingError),
}

/// Fate of one routing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Delivered { at: NodeId, message: Message },

    /// Parked in the pending queue of `at`
    Held { at: NodeId, message_id: u64 },

    Dropped { at: NodeId, message: Message, reason: DropReason },
}

impl RouteOutcome {
    pub fn correspondence(&self) -> Option<CorrespondenceId> {
        match self {
            RouteOutcome::Delivered { message, .. } | RouteOutcome::Dropped { message, .. } => {
                message.correspondence
            }
            RouteOutcome::Held { .. } => None,
        }
    }
}

// ============================================================================
// ROUTING
// ============================================================================

impl Network {
    /// Forwards `message` from the device `from` until it is delivered, held or dropped.
    pub fn route(&mut self, from: NodeId, mut message: Message) -> RouteOutcome {
        let target = match self.resolve_device(&message.destination) {
            Some(id) => id,
            None => {
                let error = RoutingError::no_route(from, &message.destination);
                return RouteOutcome::Dropped {
                    at: from,
                    message,
                    reason: DropReason::Unroutable(error),
                };
            }
        };

        // Shortest paths never revisit a device; anything longer is a loop
        let hop_guard = self.len() + 1;
        let mut hops = 0usize;
        let mut at = from;

        loop {
            if at == target {
                if let Some(device) = self.device_mut(at) {
                    device.packets_received += 1;
                }
                trace!(message = message.id, at = %at, hops = message.total_hops, "delivered");
                return RouteOutcome::Delivered { at, message };
            }

            if message.budget_exhausted() {
                let message_id = message.id;
                match self.device_mut(at) {
                    Some(device) => device.pending.push_back(message),
                    None => {
                        return RouteOutcome::Dropped {
                            at,
                            reason: DropReason::Unroutable(RoutingError::UnknownNode(at)),
                            message,
                        }
                    }
                }
                trace!(message = message_id, at = %at, "held");
                return RouteOutcome::Held { at, message_id };
            }

            let next = match self.next_hop(at, &message.destination) {
                Ok(next) if hops <= hop_guard => next,
                Ok(_) => {
                    let error = RoutingError::no_route(at, &message.destination);
                    return RouteOutcome::Dropped {
                        at,
                        message,
                        reason: DropReason::Unroutable(error),
                    };
                }
                Err(error) => {
                    return RouteOutcome::Dropped {
                        at,
                        message,
                        reason: DropReason::Unroutable(error),
                    }
                }
            };

            // Admission control applies to devices that would forward it on
            if next != target {
                match self.device_mut(next) {
                    Some(device) if device.at_capacity() => {
                        trace!(message = message.id, at = %next, "capacity drop");
                        return RouteOutcome::Dropped {
                            at,
                            message,
                            reason: DropReason::Capacity { at: next },
                        };
                    }
                    Some(device) => device.forwarded_this_tick += 1,
                    None => {}
                }
            }

            self.mark_edge(at, next, message.payload.is_malicious());
            if let Some(device) = self.device_mut(at) {
                device.packets_sent += 1;
            }
            message.hops_this_tick += 1;
            message.total_hops += 1;
            hops += 1;
            at = next;
        }
    }

    /// Device the message at `at` moves to next.
    pub fn next_hop(&self, at: NodeId, destination: &Address) -> Result<NodeId, RoutingError> {
        let no_route = || RoutingError::no_route(at, destination);
        let mut cur = at;

        loop {
            let node = self.node(cur).ok_or(RoutingError::UnknownNode(cur))?;
            let parent = node.parent.ok_or_else(no_route)?;
            let siblings = self.subnetwork(parent).ok_or(RoutingError::UnknownNode(parent))?;

            if node.address.is_subnetwork_of(destination) {
                // Destination sits under a sibling in this local graph
                let depth = node.address.len();
                let local = destination
                    .get(depth.checked_sub(1).ok_or_else(no_route)?)
                    .ok_or_else(no_route)? as usize;
                if local == node.local_id {
                    return Err(no_route());
                }
                let hop = node.routing.next_hop(local).ok_or_else(no_route)?;
                let child = siblings.children.get(hop).copied().ok_or_else(no_route)?;
                return Ok(self.gateway_device(child));
            }

            let gateway = siblings.graph.gateway();
            if node.local_id == gateway {
                cur = parent;
                continue;
            }
            let hop = node.routing.next_hop(gateway).ok_or_else(no_route)?;
            let child = siblings.children.get(hop).copied().ok_or_else(no_route)?;
            return Ok(self.gateway_device(child));
        }
    }

    /// Resumes every held message with a fresh hop budget.
    pub fn retry_pending(&mut self) -> Vec<RouteOutcome> {
        let mut parked = Vec::new();
        for index in 0..self.len() {
            let id = NodeId(index);
            if let Some(device) = self.device_mut(id) {
                parked.extend(device.pending.drain(..).map(|m| (id, m)));
            }
        }

        parked
            .into_iter()
            .map(|(at, mut message)| {
                message.hops_this_tick = 0;
                self.route(at, message)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkBuilder, OrganizationLayout, PlainDevices};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn network(seed: u64, layouts: Vec<OrganizationLayout>) -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        NetworkBuilder::new()
            .with_organizations(layouts)
            .with_attacker_slots(2)
            .build(&mut rng, &mut PlainDevices)
    }

    fn message(net: &Network, from: NodeId, to: NodeId) -> Message {
        Message::new(
            1,
            net.address(from).cloned().unwrap_or_default(),
            net.address(to).cloned().unwrap_or_default(),
            Payload::Plain,
            0,
        )
    }

    fn all_devices(net: &Network) -> Vec<NodeId> {
        net.leaf_devices(net.root())
    }

    #[test]
    fn test_self_delivery_in_single_node_subnetwork() {
        let net_layout = vec![OrganizationLayout::Flat { devices: 1 }];
        let mut net = network(1, net_layout);
        let device = net.leaf_devices(net.organization_nodes()[0])[0];

        assert_eq!(net.device(device).map(|d| d.packets_received), Some(0));
        let msg = message(&net, device, device);
        assert!(matches!(net.route(device, msg), RouteOutcome::Delivered { at, .. } if at == device));
        assert_eq!(net.device(device).map(|d| d.packets_received), Some(1));
    }

    #[test]
    fn test_delivery_across_organizations() {
        let mut net = network(2, vec![OrganizationLayout::Flat { devices: 5 }; 4]);
        let devices = all_devices(&net);

        for &from in &devices {
            for &to in &devices {
                let msg = message(&net, from, to);
                match net.route(from, msg) {
                    RouteOutcome::Delivered { at, message } => {
                        assert_eq!(at, to);
                        assert!(message.total_hops as usize <= net.len());
                    }
                    other => panic!("{} -> {} not delivered: {:?}", from, to, other),
                }
            }
        }
    }

    #[test]
    fn test_delivery_through_departments() {
        let layout = OrganizationLayout::Departments { sizes: vec![4, 3, 5] };
        let mut net = network(3, vec![layout.clone(), layout]);
        let devices = all_devices(&net);

        let (first, last) = (devices[0], devices[devices.len() - 1]);
        let msg = message(&net, first, last);
        assert!(matches!(net.route(first, msg), RouteOutcome::Delivered { at, .. } if at == last));
    }

    #[test]
    fn test_hop_limit_holds_and_resumes() {
        let mut net = network(4, vec![OrganizationLayout::Departments { sizes: vec![4, 4] }; 3]);
        let devices = all_devices(&net);

        // Find a pair that needs more than one hop
        let (from, to) = devices
            .iter()
            .flat_map(|&a| devices.iter().map(move |&b| (a, b)))
            .find(|&(a, b)| {
                let mut probe = net.clone();
                matches!(probe.route(a, message(&net, a, b)), RouteOutcome::Delivered { message, .. } if message.total_hops >= 3)
            })
            .expect("multi-hop pair");

        let msg = message(&net, from, to).with_max_hops(1);
        let held_at = match net.route(from, msg) {
            RouteOutcome::Held { at, .. } => at,
            other => panic!("expected hold, got {:?}", other),
        };
        assert_ne!(held_at, from);
        assert_eq!(net.pending_count(), 1);

        let mut delivered = false;
        for _ in 0..10 {
            net.reset_tick();
            for outcome in net.retry_pending() {
                if let RouteOutcome::Delivered { at, message } = outcome {
                    assert_eq!(at, to);
                    assert!(message.total_hops >= 3);
                    delivered = true;
                }
            }
            if delivered {
                break;
            }
        }
        assert!(delivered);
        assert_eq!(net.pending_count(), 0);
    }

    #[test]
    fn test_zero_hop_budget_never_moves() {
        let mut net = network(5, vec![OrganizationLayout::Flat { devices: 3 }; 2]);
        let devices = all_devices(&net);
        let (from, to) = (devices[0], devices[devices.len() - 1]);

        let msg = message(&net, from, to).with_max_hops(0);
        assert!(matches!(net.route(from, msg), RouteOutcome::Held { at, .. } if at == from));
    }

    #[test]
    fn test_capacity_rejects_forwarding() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut net = NetworkBuilder::new()
            .flat_organizations(&[4, 4])
            .with_device_capacity(Some(0))
            .build(&mut rng, &mut PlainDevices);

        let a = net.leaf_devices(net.organization_nodes()[0]);
        let b = net.leaf_devices(net.organization_nodes()[1]);
        let gateway_a = net.gateway_device(net.organization_nodes()[0]);
        let from = a.iter().copied().find(|&d| d != gateway_a).unwrap_or(a[0]);
        let to = b[0];

        let msg = message(&net, from, to);
        match net.route(from, msg) {
            RouteOutcome::Dropped { reason: DropReason::Capacity { .. }, .. } => {}
            other => panic!("expected capacity drop, got {:?}", other),
        }

        // The star edge reaches the gateway directly, and the target never forwards
        let msg = message(&net, from, gateway_a);
        assert!(matches!(net.route(from, msg), RouteOutcome::Delivered { .. }));
    }

    #[test]
    fn test_unresolvable_destination_drops() {
        let mut net = network(7, vec![OrganizationLayout::Flat { devices: 3 }]);
        let from = all_devices(&net)[0];

        let mut msg = message(&net, from, from);
        msg.destination = "42.1".parse().unwrap();
        assert!(matches!(
            net.route(from, msg),
            RouteOutcome::Dropped { reason: DropReason::Unroutable(RoutingError::RoutingFailure { .. }), .. }
        ));

        // A subnetwork address is not a device
        let mut msg = message(&net, from, from);
        msg.destination = net.address(net.organization_nodes()[0]).cloned().unwrap_or_default();
        assert!(matches!(net.route(from, msg), RouteOutcome::Dropped { .. }));
    }

    #[test]
    fn test_malicious_payload_marks_edges() {
        let mut net = network(8, vec![OrganizationLayout::Flat { devices: 4 }; 2]);
        let devices = all_devices(&net);
        let (from, to) = (devices[0], devices[devices.len() - 1]);

        let mut msg = message(&net, from, to);
        msg.payload = Payload::Control { attacker: AttackerId(0) };
        assert!(matches!(net.route(from, msg), RouteOutcome::Delivered { .. }));

        assert!(net.edges().iter().any(|e| e.malicious));
        assert!(net.edges().iter().all(|e| !e.malicious || e.active));

        net.reset_tick();
        assert!(net.edges().iter().all(|e| !e.active));
    }

    #[test]
    fn test_attached_attacker_reachable() {
        let mut net = network(9, vec![OrganizationLayout::Flat { devices: 3 }; 2]);
        let pool = net.attacker_pool();
        let attacker = net.attach_device(pool, crate::agent::Role::Device).unwrap();
        let victim = net.leaf_devices(net.organization_nodes()[1])[1];

        let out = message(&net, attacker, victim);
        assert!(matches!(net.route(attacker, out), RouteOutcome::Delivered { at, .. } if at == victim));
        let back = message(&net, victim, attacker);
        assert!(matches!(net.route(victim, back), RouteOutcome::Delivered { at, .. } if at == attacker));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_unlimited_hops_always_deliver(
            seed in any::<u64>(),
            orgs in 1usize..5,
            devices in 1usize..6,
            departments in any::<bool>(),
        ) {
            let layout = if departments {
                OrganizationLayout::Departments { sizes: vec![devices, devices + 1] }
            } else {
                OrganizationLayout::Flat { devices }
            };
            let mut net = network(seed, vec![layout; orgs]);
            let all = all_devices(&net);

            for &from in &all {
                for &to in &all {
                    let msg = message(&net, from, to);
                    let delivered = matches!(net.route(from, msg), RouteOutcome::Delivered { at, .. } if at == to);
                    prop_assert!(delivered);
                }
            }
        }
    }
}
