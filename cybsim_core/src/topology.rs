//! The "TOPOLOGY" Engine - Local graphs and frozen routing tables
//!
//! Every subnetwork owns one small undirected graph over its children:
//! - A uniformly chosen gateway with a star to every other child (connectivity)
//! - Extra random edges per pair with probability `avg_degree / n`
//! - All-pairs shortest paths frozen into per-child `RoutingTable`s
//!
//! The builder consumes exactly one uniform draw per unordered pair, whether
//! or not the pair is already connected, so the number of draws never depends
//! on which branch runs.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// LOCAL GRAPH
// ============================================================================

/// Connected undirected graph over the children of one subnetwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalGraph {
    /// Sorted neighbor lists, indexed by local id
    adjacency: Vec<Vec<usize>>,

    /// Local id of the gateway child
    gateway: usize,
}

impl LocalGraph {
    /// Builds a random star-based graph over `num_nodes` children.
    ///
    /// `num_nodes` of zero is treated as one: a subnetwork always has at least
    /// its gateway.
    pub fn random_star<R: Rng + ?Sized>(num_nodes: usize, avg_degree: f64, rng: &mut R) -> Self {
        let n = num_nodes.max(1);
        let gateway = rng.gen_range(0..n);
        let mut graph = Self {
            adjacency: vec![Vec::new(); n],
            gateway,
        };

        for node in 0..n {
            if node != gateway {
                graph.link(gateway, node);
            }
        }

        let probability = avg_degree / n as f64;
        for i in 0..n {
            for j in (i + 1)..n {
                let draw: f64 = rng.gen();
                if !graph.has_edge(i, j) && draw < probability {
                    graph.link(i, j);
                }
            }
        }

        graph
    }

    /// Builds a graph from explicit edges. Used for fixed layouts in tests.
    pub fn from_edges(num_nodes: usize, gateway: usize, edges: &[(usize, usize)]) -> Self {
        let n = num_nodes.max(1);
        let mut graph = Self {
            adjacency: vec![Vec::new(); n],
            gateway: gateway.min(n - 1),
        };
        for &(a, b) in edges {
            if a < n && b < n && a != b {
                graph.link(a, b);
            }
        }
        graph
    }

    fn link(&mut self, a: usize, b: usize) {
        if let Err(pos) = self.adjacency[a].binary_search(&b) {
            self.adjacency[a].insert(pos, b);
        }
        if let Err(pos) = self.adjacency[b].binary_search(&a) {
            self.adjacency[b].insert(pos, a);
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Always false; a graph holds at least its gateway.
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Local id of the gateway.
    pub fn gateway(&self) -> usize {
        self.gateway
    }

    /// Sorted neighbors of `node`.
    pub fn neighbors(&self, node: usize) -> &[usize] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.adjacency
            .get(a)
            .map(|n| n.binary_search(&b).is_ok())
            .unwrap_or(false)
    }

    /// All edges as `(low, high)` pairs in ascending order.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for (a, neighbors) in self.adjacency.iter().enumerate() {
            for &b in neighbors {
                if a < b {
                    edges.push((a, b));
                }
            }
        }
        edges
    }

    /// Appends a node joined to the gateway by a single edge and returns its local id.
    pub fn add_leaf_at_gateway(&mut self) -> usize {
        let id = self.adjacency.len();
        self.adjacency.push(Vec::new());
        self.link(self.gateway, id);
        id
    }

    /// Shortest-path tables for every node, in local id order.
    pub fn routing_tables(&self) -> Vec<RoutingTable> {
        (0..self.len()).map(|source| self.bfs(source)).collect()
    }

    fn bfs(&self, source: usize) -> RoutingTable {
        let n = self.len();
        let mut predecessor: Vec<Option<usize>> = vec![None; n];
        let mut distance: Vec<Option<u32>> = vec![None; n];
        let mut queue = VecDeque::new();

        distance[source] = Some(0);
        queue.push_back(source);

        while let Some(node) = queue.pop_front() {
            let d = distance[node].unwrap_or(0);
            for &next in &self.adjacency[node] {
                if distance[next].is_none() {
                    distance[next] = Some(d + 1);
                    predecessor[next] = Some(node);
                    queue.push_back(next);
                }
            }
        }

        // First hop on each path: walk predecessors back to the source
        let mut next_hop: Vec<Option<usize>> = vec![None; n];
        next_hop[source] = Some(source);
        for dest in 0..n {
            if dest == source || distance[dest].is_none() {
                continue;
            }
            let mut cur = dest;
            while let Some(prev) = predecessor[cur] {
                if prev == source {
                    break;
                }
                cur = prev;
            }
            next_hop[dest] = Some(cur);
        }

        RoutingTable {
            source,
            next_hop,
            distance,
            predecessor,
        }
    }
}

// ============================================================================
// ROUTING TABLE
// ============================================================================

/// Frozen shortest-path data for one node inside its subnetwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Local id this table belongs to
    source: usize,

    /// First hop toward each destination (`Some(source)` for itself)
    next_hop: Vec<Option<usize>>,

    /// Hop count to each destination
    distance: Vec<Option<u32>>,

    /// BFS tree parent of each destination
    predecessor: Vec<Option<usize>>,
}

impl RoutingTable {
    /// Table for the sole node of a single-node graph (or the backbone root).
    pub fn trivial() -> Self {
        Self {
            source: 0,
            next_hop: vec![Some(0)],
            distance: vec![Some(0)],
            predecessor: vec![None],
        }
    }

    pub fn source(&self) -> usize {
        self.source
    }

    /// First hop toward `dest`, or `None` if unknown.
    pub fn next_hop(&self, dest: usize) -> Option<usize> {
        self.next_hop.get(dest).copied().flatten()
    }

    /// Hop count to `dest`.
    pub fn distance(&self, dest: usize) -> Option<u32> {
        self.distance.get(dest).copied().flatten()
    }

    /// Full path from the source to `dest`, both ends included.
    pub fn path_to(&self, dest: usize) -> Option<Vec<usize>> {
        self.distance(dest)?;
        let mut path = vec![dest];
        let mut cur = dest;
        while cur != self.source {
            cur = self.predecessor.get(cur).copied().flatten()?;
            path.push(cur);
        }
        path.reverse();
        Some(path)
    }

    /// Number of destinations covered.
    pub fn len(&self) -> usize {
        self.next_hop.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hop.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_star_is_connected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let graph = LocalGraph::random_star(12, 0.0, &mut rng);

        assert_eq!(graph.len(), 12);
        let gw = graph.gateway();
        for node in 0..12 {
            if node != gw {
                assert!(graph.has_edge(gw, node));
                assert!(graph.has_edge(node, gw));
            }
        }
        // avg_degree 0 adds nothing beyond the star
        assert_eq!(graph.edges().len(), 11);
    }

    #[test]
    fn test_single_node_graph() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let graph = LocalGraph::random_star(1, 4.0, &mut rng);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.gateway(), 0);

        let tables = graph.routing_tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].next_hop(0), Some(0));
        assert_eq!(tables[0], RoutingTable::trivial());

        // Zero children still yields the gateway
        let empty = LocalGraph::random_star(0, 1.0, &mut rng);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn test_draw_parity() {
        // The builder draws once for the gateway and once per pair,
        // regardless of degree.
        for &degree in &[0.0, 2.0, 50.0] {
            let mut rng = ChaCha8Rng::seed_from_u64(77);
            let _ = LocalGraph::random_star(9, degree, &mut rng);
            let after: f64 = rng.gen();

            let mut reference = ChaCha8Rng::seed_from_u64(77);
            let _ = reference.gen_range(0..9usize);
            for _ in 0..(9 * 8 / 2) {
                let _: f64 = reference.gen();
            }
            let expected: f64 = reference.gen();

            assert_eq!(after, expected, "draw count changed with degree {}", degree);
        }
    }

    #[test]
    fn test_routing_table_paths() {
        // 0 - 1 - 2 - 3 line with gateway 1
        let graph = LocalGraph::from_edges(4, 1, &[(0, 1), (1, 2), (2, 3)]);
        let tables = graph.routing_tables();

        assert_eq!(tables[0].next_hop(3), Some(1));
        assert_eq!(tables[0].distance(3), Some(3));
        assert_eq!(tables[0].path_to(3), Some(vec![0, 1, 2, 3]));
        assert_eq!(tables[3].next_hop(0), Some(2));
        assert_eq!(tables[2].next_hop(2), Some(2));
        assert_eq!(tables[2].path_to(2), Some(vec![2]));
        assert_eq!(tables[0].next_hop(9), None);
    }

    #[test]
    fn test_add_leaf_at_gateway() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut graph = LocalGraph::random_star(3, 0.0, &mut rng);
        let gw = graph.gateway();

        let leaf = graph.add_leaf_at_gateway();
        assert_eq!(leaf, 3);
        assert!(graph.has_edge(gw, leaf));
        assert_eq!(graph.neighbors(leaf), &[gw]);

        let tables = graph.routing_tables();
        for source in 0..4 {
            assert!(tables[source].next_hop(leaf).is_some());
        }
    }

    proptest! {
        #[test]
        fn prop_every_pair_reachable(n in 1usize..25, degree in 0.0f64..6.0, seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let graph = LocalGraph::random_star(n, degree, &mut rng);
            let tables = graph.routing_tables();

            for a in 0..n {
                for b in 0..n {
                    let hop = tables[a].next_hop(b);
                    prop_assert!(hop.is_some());
                    // Star guarantees a diameter of at most two
                    prop_assert!(tables[a].distance(b).unwrap_or(u32::MAX) <= 2);
                    if a != b {
                        prop_assert!(graph.has_edge(a, hop.unwrap_or(a)));
                    }
                }
            }
        }
    }
}
