//! Network arena: nested subnetworks down to leaf devices.
//!
//! The world is one backbone subnetwork whose children are the organizations
//! and a single attacker pool. Nodes live in a flat arena indexed by `NodeId`;
//! each subnetwork owns a `LocalGraph` over its children and every node keeps
//! the frozen routing table for its position in that graph.

use crate::agent::Role;
use crate::error::RoutingError;
use crate::ids::{NodeId, OrgId};
use crate::routing::Message;
use crate::topology::{LocalGraph, RoutingTable};
use cybsim_env::Address;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

// ============================================================================
// NODES
// ============================================================================

/// Kind of subnetwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetworkKind {
    Backbone,
    Organization(OrgId),
    Department(OrgId),
    AttackerPool,
}

/// A subnetwork: a local graph over child nodes.
#[derive(Debug, Clone)]
pub struct Subnetwork {
    pub kind: SubnetworkKind,

    pub graph: LocalGraph,

    /// Child node per local id
    pub children: Vec<NodeId>,
}

/// A leaf device.
#[derive(Debug, Clone)]
pub struct Device {
    pub role: Role,

    /// Owning organization (`None` in the attacker pool)
    pub org: Option<OrgId>,

    pub packets_sent: u64,

    pub packets_received: u64,

    /// Messages whose hop budget ran out here, resumed next tick
    pub pending: VecDeque<Message>,

    /// Messages this device may forward per tick (`None` is unlimited)
    pub capacity: Option<u32>,

    pub forwarded_this_tick: u32,
}

impl Device {
    pub fn new(role: Role, org: Option<OrgId>, capacity: Option<u32>) -> Self {
        Self {
            role,
            org,
            packets_sent: 0,
            packets_received: 0,
            pending: VecDeque::new(),
            capacity,
            forwarded_this_tick: 0,
        }
    }

    /// True when the per-tick forwarding allowance is used up.
    pub fn at_capacity(&self) -> bool {
        matches!(self.capacity, Some(cap) if self.forwarded_this_tick >= cap)
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Device(Device),
    Subnetwork(Subnetwork),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,

    pub address: Address,

    pub parent: Option<NodeId>,

    /// Index inside the parent's local graph
    pub local_id: usize,

    /// Routing table inside the parent's local graph
    pub routing: RoutingTable,

    pub kind: NodeKind,
}

/// Per-tick state of a link between two gateway devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeState {
    pub a: NodeId,

    pub b: NodeId,

    /// Carried any message this tick
    pub active: bool,

    /// Carried an attack payload this tick
    pub malicious: bool,
}

// ============================================================================
// ROLE ASSIGNMENT
// ============================================================================

/// Position a new leaf device is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Gateway,
    Employee,
    /// Non-gateway device left without a user
    Plain,
    Attacker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSlot {
    pub org: Option<OrgId>,

    pub kind: SlotKind,
}

/// Decides the role of each leaf device as the builder creates it.
pub trait RoleFactory {
    fn create_role(&mut self, slot: &DeviceSlot, rng: &mut dyn RngCore) -> Role;
}

/// Factory that leaves every device without a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDevices;

impl RoleFactory for PlainDevices {
    fn create_role(&mut self, _slot: &DeviceSlot, _rng: &mut dyn RngCore) -> Role {
        Role::Device
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Shape of one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrganizationLayout {
    /// Devices directly under the organization; every non-gateway is an employee
    Flat { devices: usize },

    /// Department subnetworks of the given sizes
    Departments { sizes: Vec<usize> },
}

impl OrganizationLayout {
    pub fn device_total(&self) -> usize {
        match self {
            OrganizationLayout::Flat { devices } => (*devices).max(1),
            OrganizationLayout::Departments { sizes } => {
                if sizes.is_empty() {
                    1
                } else {
                    sizes.iter().map(|&s| s.max(1)).sum()
                }
            }
        }
    }
}

/// Builds the world topology.
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    organizations: Vec<OrganizationLayout>,

    attacker_slots: usize,

    backbone_degree: f64,

    organization_degree: f64,

    device_capacity: Option<u32>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self {
            organizations: Vec::new(),
            attacker_slots: 0,
            backbone_degree: 2.0,
            organization_degree: 2.0,
            device_capacity: None,
        }
    }

    pub fn with_organizations(mut self, organizations: Vec<OrganizationLayout>) -> Self {
        self.organizations = organizations;
        self
    }

    /// Flat organizations with the given device counts.
    pub fn flat_organizations(mut self, devices: &[usize]) -> Self {
        self.organizations = devices
            .iter()
            .map(|&devices| OrganizationLayout::Flat { devices })
            .collect();
        self
    }

    pub fn with_attacker_slots(mut self, slots: usize) -> Self {
        self.attacker_slots = slots;
        self
    }

    pub fn with_degrees(mut self, backbone: f64, organization: f64) -> Self {
        self.backbone_degree = backbone;
        self.organization_degree = organization;
        self
    }

    pub fn with_device_capacity(mut self, capacity: Option<u32>) -> Self {
        self.device_capacity = capacity;
        self
    }

    /// Instantiates the whole hierarchy and its routing tables.
    pub fn build<R, F>(self, rng: &mut R, factory: &mut F) -> Network
    where
        R: RngCore,
        F: RoleFactory + ?Sized,
    {
        let rng: &mut dyn RngCore = rng;
        let mut net = Network {
            nodes: Vec::new(),
            root: NodeId(0),
            attacker_pool: NodeId(0),
            organizations: Vec::new(),
            edges: Vec::new(),
            edge_index: BTreeMap::new(),
            device_capacity: self.device_capacity,
        };

        let top_level = self.organizations.len() + 1;
        let graph = LocalGraph::random_star(top_level, self.backbone_degree, rng);
        let tables = graph.routing_tables();
        let root = net.push_subnetwork(
            Address::root(),
            None,
            0,
            RoutingTable::trivial(),
            SubnetworkKind::Backbone,
            graph,
        );
        net.root = root;

        let mut children = Vec::with_capacity(top_level);
        for (index, table) in tables.into_iter().enumerate() {
            let address = Address::root().join(index as u32);
            let child = match self.organizations.get(index) {
                Some(layout) => {
                    let org = OrgId(index);
                    let node = self.build_organization(&mut net, root, index, address, table, org, layout, rng, factory);
                    net.organizations.push(node);
                    node
                }
                None => {
                    let node = self.build_devices(
                        &mut net,
                        root,
                        index,
                        address,
                        table,
                        SubnetworkKind::AttackerPool,
                        self.attacker_slots + 1,
                        0.0,
                        rng,
                        factory,
                    );
                    net.attacker_pool = node;
                    node
                }
            };
            children.push(child);
        }
        net.finish_subnetwork(root, children);

        debug!(
            nodes = net.nodes.len(),
            edges = net.edges.len(),
            organizations = net.organizations.len(),
            "network built"
        );
        net
    }

    #[allow(clippy::too_many_arguments)]
    fn build_organization<F: RoleFactory + ?Sized>(
        &self,
        net: &mut Network,
        parent: NodeId,
        local_id: usize,
        address: Address,
        routing: RoutingTable,
        org: OrgId,
        layout: &OrganizationLayout,
        rng: &mut dyn RngCore,
        factory: &mut F,
    ) -> NodeId {
        match layout {
            OrganizationLayout::Flat { devices } => self.build_devices(
                net,
                parent,
                local_id,
                address,
                routing,
                SubnetworkKind::Organization(org),
                *devices,
                self.organization_degree,
                rng,
                factory,
            ),
            OrganizationLayout::Departments { sizes } => {
                let graph = LocalGraph::random_star(sizes.len(), self.organization_degree, rng);
                let tables = graph.routing_tables();
                let node = net.push_subnetwork(
                    address.clone(),
                    Some(parent),
                    local_id,
                    routing,
                    SubnetworkKind::Organization(org),
                    graph,
                );

                let mut children = Vec::with_capacity(tables.len());
                for (index, table) in tables.into_iter().enumerate() {
                    let size = sizes.get(index).copied().unwrap_or(1);
                    children.push(self.build_devices(
                        net,
                        node,
                        index,
                        address.join(index as u32),
                        table,
                        SubnetworkKind::Department(org),
                        size,
                        self.organization_degree,
                        rng,
                        factory,
                    ));
                }
                net.finish_subnetwork(node, children);
                node
            }
        }
    }

    /// Builds a subnetwork of leaf devices and assigns their roles.
    #[allow(clippy::too_many_arguments)]
    fn build_devices<F: RoleFactory + ?Sized>(
        &self,
        net: &mut Network,
        parent: NodeId,
        local_id: usize,
        address: Address,
        routing: RoutingTable,
        kind: SubnetworkKind,
        count: usize,
        degree: f64,
        rng: &mut dyn RngCore,
        factory: &mut F,
    ) -> NodeId {
        let graph = LocalGraph::random_star(count, degree, rng);
        let n = graph.len();
        let gateway = graph.gateway();
        let tables = graph.routing_tables();
        let node = net.push_subnetwork(address.clone(), Some(parent), local_id, routing, kind, graph);

        // Departments only staff part of their machines
        let users = match kind {
            SubnetworkKind::Department(_) if n > 1 => {
                let upper = (n - n / 2).max(2);
                rng.gen_range(2..=upper).min(n - 1)
            }
            _ => n.saturating_sub(1),
        };
        let org = match kind {
            SubnetworkKind::Organization(org) | SubnetworkKind::Department(org) => Some(org),
            _ => None,
        };

        let mut children = Vec::with_capacity(n);
        let mut staffed = 0;
        for (index, table) in tables.into_iter().enumerate() {
            let slot_kind = if index == gateway {
                SlotKind::Gateway
            } else if kind == SubnetworkKind::AttackerPool {
                SlotKind::Attacker
            } else if staffed < users {
                staffed += 1;
                SlotKind::Employee
            } else {
                SlotKind::Plain
            };

            let role = factory.create_role(&DeviceSlot { org, kind: slot_kind }, rng);
            let id = NodeId(net.nodes.len());
            net.nodes.push(Node {
                id,
                address: address.join(index as u32),
                parent: Some(node),
                local_id: index,
                routing: table,
                kind: NodeKind::Device(Device::new(role, org, self.device_capacity)),
            });
            children.push(id);
        }
        net.finish_subnetwork(node, children);
        node
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// The instantiated hierarchy plus the master edge list.
#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<Node>,

    root: NodeId,

    attacker_pool: NodeId,

    /// Organization subnetwork per `OrgId`
    organizations: Vec<NodeId>,

    edges: Vec<EdgeState>,

    edge_index: BTreeMap<(NodeId, NodeId), usize>,

    device_capacity: Option<u32>,
}

impl Network {
    fn push_subnetwork(
        &mut self,
        address: Address,
        parent: Option<NodeId>,
        local_id: usize,
        routing: RoutingTable,
        kind: SubnetworkKind,
        graph: LocalGraph,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            address,
            parent,
            local_id,
            routing,
            kind: NodeKind::Subnetwork(Subnetwork {
                kind,
                graph,
                children: Vec::new(),
            }),
        });
        id
    }

    /// Stores the children of a subnetwork and registers its local edges.
    fn finish_subnetwork(&mut self, id: NodeId, children: Vec<NodeId>) {
        let edges = match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Subnetwork(sub)) => {
                sub.children = children.clone();
                sub.graph.edges()
            }
            _ => return,
        };
        for (a, b) in edges {
            if let (Some(&ca), Some(&cb)) = (children.get(a), children.get(b)) {
                let ga = self.gateway_device(ca);
                let gb = self.gateway_device(cb);
                self.add_edge(ga, gb);
            }
        }
    }

    fn add_edge(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let key = (a.min(b), a.max(b));
        if self.edge_index.contains_key(&key) {
            return;
        }
        self.edge_index.insert(key, self.edges.len());
        self.edges.push(EdgeState {
            a: key.0,
            b: key.1,
            active: false,
            malicious: false,
        });
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn attacker_pool(&self) -> NodeId {
        self.attacker_pool
    }

    /// Organization subnetwork nodes, indexed by `OrgId`.
    pub fn organization_nodes(&self) -> &[NodeId] {
        &self.organizations
    }

    pub fn address(&self, id: NodeId) -> Option<&Address> {
        self.node(id).map(|n| &n.address)
    }

    pub fn is_device(&self, id: NodeId) -> bool {
        self.device(id).is_some()
    }

    pub fn device(&self, id: NodeId) -> Option<&Device> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Device(d)) => Some(d),
            _ => None,
        }
    }

    pub fn device_mut(&mut self, id: NodeId) -> Option<&mut Device> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Device(d)) => Some(d),
            _ => None,
        }
    }

    pub fn subnetwork(&self, id: NodeId) -> Option<&Subnetwork> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Subnetwork(s)) => Some(s),
            _ => None,
        }
    }

    pub fn role(&self, id: NodeId) -> Option<&Role> {
        self.device(id).map(|d| &d.role)
    }

    pub fn role_mut(&mut self, id: NodeId) -> Option<&mut Role> {
        self.device_mut(id).map(|d| &mut d.role)
    }

    pub fn org_of(&self, id: NodeId) -> Option<OrgId> {
        self.device(id).and_then(|d| d.org)
    }

    /// Device standing in for `id`: itself, or its gateway's device recursively.
    pub fn gateway_device(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(sub) = self.subnetwork(cur) {
            match sub.children.get(sub.graph.gateway()) {
                Some(&child) => cur = child,
                None => break,
            }
        }
        cur
    }

    /// Walks the hierarchy along `address`.
    pub fn resolve(&self, address: &Address) -> Option<NodeId> {
        let mut cur = self.root;
        for &component in address.components() {
            let sub = self.subnetwork(cur)?;
            cur = *sub.children.get(component as usize)?;
        }
        Some(cur)
    }

    /// Resolves an address that must name a leaf device.
    pub fn resolve_device(&self, address: &Address) -> Option<NodeId> {
        self.resolve(address).filter(|&id| self.is_device(id))
    }

    /// Leaf devices below `id` in child order.
    pub fn leaf_devices(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            match self.node(cur).map(|n| &n.kind) {
                Some(NodeKind::Device(_)) => out.push(cur),
                Some(NodeKind::Subnetwork(sub)) => stack.extend(sub.children.iter().rev()),
                None => {}
            }
        }
        out
    }

    /// Every device with an employee, ascending.
    pub fn employees(&self) -> Vec<NodeId> {
        self.devices_where(|role| role.employee().is_some())
    }

    /// Every device whose role takes part in decide, ascending.
    pub fn agents(&self) -> Vec<NodeId> {
        self.devices_where(Role::is_agent)
    }

    fn devices_where(&self, pred: impl Fn(&Role) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Device(d) if pred(&d.role) => Some(n.id),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    pub fn edges(&self) -> &[EdgeState] {
        &self.edges
    }

    pub fn edge(&self, a: NodeId, b: NodeId) -> Option<&EdgeState> {
        let key = (a.min(b), a.max(b));
        self.edge_index.get(&key).and_then(|&i| self.edges.get(i))
    }

    /// Marks the link between two devices as used this tick.
    pub fn mark_edge(&mut self, a: NodeId, b: NodeId, malicious: bool) {
        let key = (a.min(b), a.max(b));
        if let Some(edge) = self.edge_index.get(&key).and_then(|&i| self.edges.get_mut(i)) {
            edge.active = true;
            edge.malicious |= malicious;
        }
    }

    /// Clears edge marks and forwarding counters at the start of a tick.
    pub fn reset_tick(&mut self) {
        for edge in &mut self.edges {
            edge.active = false;
            edge.malicious = false;
        }
        for node in &mut self.nodes {
            if let NodeKind::Device(d) = &mut node.kind {
                d.forwarded_this_tick = 0;
            }
        }
    }

    // ------------------------------------------------------------------
    // Dynamic insertion
    // ------------------------------------------------------------------

    /// Adds a device to a subnetwork of devices, linked to its gateway.
    ///
    /// Rebuilds the routing tables of every node in that subnetwork.
    pub fn attach_device(&mut self, subnetwork: NodeId, role: Role) -> Result<NodeId, RoutingError> {
        let id = NodeId(self.nodes.len());
        let (address, local_id, tables, gateway, mut children) = match self.nodes.get_mut(subnetwork.0) {
            Some(Node {
                address,
                kind: NodeKind::Subnetwork(sub),
                ..
            }) => {
                let local_id = sub.graph.add_leaf_at_gateway();
                sub.children.push(id);
                (
                    address.join(local_id as u32),
                    local_id,
                    sub.graph.routing_tables(),
                    sub.graph.gateway(),
                    sub.children.clone(),
                )
            }
            _ => return Err(RoutingError::UnknownNode(subnetwork)),
        };

        let org = match self.subnetwork(subnetwork).map(|s| s.kind) {
            Some(SubnetworkKind::Organization(org)) | Some(SubnetworkKind::Department(org)) => Some(org),
            _ => None,
        };
        let routing = tables.get(local_id).cloned().unwrap_or_else(RoutingTable::trivial);
        self.nodes.push(Node {
            id,
            address,
            parent: Some(subnetwork),
            local_id,
            routing,
            kind: NodeKind::Device(Device::new(role, org, self.device_capacity)),
        });

        for (index, child) in children.drain(..).enumerate() {
            if let (Some(node), Some(table)) = (self.nodes.get_mut(child.0), tables.get(index)) {
                node.routing = table.clone();
            }
        }

        let gateway_child = self
            .subnetwork(subnetwork)
            .and_then(|s| s.children.get(gateway).copied())
            .ok_or(RoutingError::UnknownNode(subnetwork))?;
        let gw = self.gateway_device(gateway_child);
        self.add_edge(gw, id);

        Ok(id)
    }

    /// Messages waiting in pending queues.
    pub fn pending_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| match &n.kind {
                NodeKind::Device(d) => d.pending.len(),
                NodeKind::Subnetwork(_) => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::PopulationFactory;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn build(seed: u64, layouts: Vec<OrganizationLayout>, attackers: usize) -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut factory = PopulationFactory::new(vec![0.5; layouts.len()]);
        NetworkBuilder::new()
            .with_organizations(layouts)
            .with_attacker_slots(attackers)
            .build(&mut rng, &mut factory)
    }

    #[test]
    fn test_flat_organizations() {
        let net = build(1, vec![OrganizationLayout::Flat { devices: 5 }; 3], 2);

        assert_eq!(net.organization_nodes().len(), 3);
        for (i, &org) in net.organization_nodes().iter().enumerate() {
            let devices = net.leaf_devices(org);
            assert_eq!(devices.len(), 5);
            // Every non-gateway is staffed
            let staffed = devices.iter().filter(|&&d| net.role(d).is_some_and(|r| r.employee().is_some())).count();
            assert_eq!(staffed, 4);
            assert!(devices.iter().all(|&d| net.org_of(d) == Some(OrgId(i))));
        }

        let pool = net.leaf_devices(net.attacker_pool());
        assert_eq!(pool.len(), 3);
        let attackers = pool.iter().filter(|&&d| net.role(d).is_some_and(|r| r.attacker().is_some())).count();
        assert_eq!(attackers, 2);
        assert_eq!(net.agents().len(), 12 + 2);
    }

    #[test]
    fn test_departmental_organization() {
        let net = build(2, vec![OrganizationLayout::Departments { sizes: vec![6, 1, 4] }], 0);
        let org = net.organization_nodes()[0];
        let sub = net.subnetwork(org).map(|s| s.children.clone()).unwrap_or_default();
        assert_eq!(sub.len(), 3);

        for (dept, size) in sub.iter().zip([6usize, 1, 4]) {
            assert!(matches!(net.subnetwork(*dept).map(|s| s.kind), Some(SubnetworkKind::Department(OrgId(0)))));
            let devices = net.leaf_devices(*dept);
            assert_eq!(devices.len(), size);
            let staffed = devices.iter().filter(|&&d| net.role(d).is_some_and(|r| r.employee().is_some())).count();
            if size == 1 {
                assert_eq!(staffed, 0);
            } else {
                assert!(staffed >= 1 && staffed <= size - 1);
            }
        }
        assert_eq!(net.leaf_devices(org).len(), 11);
    }

    #[test]
    fn test_addresses_resolve() {
        let net = build(3, vec![OrganizationLayout::Flat { devices: 4 }; 2], 1);
        for node in net.nodes() {
            assert_eq!(net.resolve(&node.address), Some(node.id));
        }
        assert_eq!(net.resolve(&"9.9".parse().unwrap()), None);
        let org = net.organization_nodes()[1];
        assert_eq!(net.resolve_device(&net.address(org).cloned().unwrap()), None);
    }

    #[test]
    fn test_master_edges_join_gateway_devices() {
        let net = build(4, vec![OrganizationLayout::Flat { devices: 3 }; 3], 1);
        let root = net.subnetwork(net.root()).cloned().unwrap();
        for (a, b) in root.graph.edges() {
            let ga = net.gateway_device(root.children[a]);
            let gb = net.gateway_device(root.children[b]);
            assert!(net.is_device(ga) && net.is_device(gb));
            assert!(net.edge(ga, gb).is_some());
        }
        assert!(net.edges().iter().all(|e| e.a < e.b && !e.active));
    }

    #[test]
    fn test_mark_and_reset_edges() {
        let mut net = build(5, vec![OrganizationLayout::Flat { devices: 3 }], 0);
        let edge = net.edges()[0];

        net.mark_edge(edge.b, edge.a, true);
        assert!(net.edge(edge.a, edge.b).is_some_and(|e| e.active && e.malicious));

        net.reset_tick();
        assert!(net.edge(edge.a, edge.b).is_some_and(|e| !e.active && !e.malicious));
    }

    #[test]
    fn test_attach_device_to_pool() {
        let mut net = build(6, vec![OrganizationLayout::Flat { devices: 3 }], 1);
        let pool = net.attacker_pool();
        let before = net.leaf_devices(pool).len();

        let id = net
            .attach_device(pool, Role::Device)
            .expect("pool accepts devices");
        assert_eq!(net.leaf_devices(pool).len(), before + 1);
        assert_eq!(net.address(id).and_then(|a| a.last()), Some(before as u32));
        assert_eq!(net.resolve(&net.address(id).cloned().unwrap()), Some(id));

        let gw = net.gateway_device(pool);
        assert!(net.edge(gw, id).is_some());

        // Every sibling can route to the newcomer
        for child in net.leaf_devices(pool) {
            let table = &net.node(child).unwrap().routing;
            assert!(table.next_hop(before).is_some());
        }

        assert!(matches!(
            net.attach_device(id, Role::Device),
            Err(RoutingError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_plain_factory_and_single_device() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let net = NetworkBuilder::new()
            .flat_organizations(&[1])
            .build(&mut rng, &mut PlainDevices);

        let org = net.organization_nodes()[0];
        let devices = net.leaf_devices(org);
        assert_eq!(devices.len(), 1);
        assert_eq!(net.gateway_device(org), devices[0]);
        assert!(net.agents().is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(42, vec![OrganizationLayout::Flat { devices: 6 }; 4], 2);
        let b = build(42, vec![OrganizationLayout::Flat { devices: 6 }; 4], 2);
        assert_eq!(a.edges(), b.edges());
        let roles_a: Vec<_> = a.nodes().iter().map(|n| n.address.clone()).collect();
        let roles_b: Vec<_> = b.nodes().iter().map(|n| n.address.clone()).collect();
        assert_eq!(roles_a, roles_b);
    }
}
