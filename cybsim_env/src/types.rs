//! Common types for the cybsim environment abstraction.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discrete simulation time.
pub type Tick = u64;

/// Hierarchical address of a node in the nested subnetwork topology.
///
/// Each component is the node's local id inside the enclosing subnetwork,
/// read from the outermost level inwards. The backbone itself has the empty
/// address; an organization directly below it is `[3]`, its fifth device is
/// `[3, 4]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(Vec<u32>);

impl Address {
    /// Creates the empty (backbone) address.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Creates an address from its components.
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    /// Creates an address from signed components, rejecting negative values.
    pub fn try_from_signed(components: &[i64]) -> Result<Self, EnvError> {
        components
            .iter()
            .map(|&c| {
                u32::try_from(c).map_err(|_| EnvError::address(format!("component {} out of range", c)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Returns a new address with `component` appended.
    pub fn join(&self, component: u32) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }

    /// Appends a signed component, failing on values that cannot be a local id.
    pub fn try_join(&self, component: i64) -> Result<Self, EnvError> {
        let component = u32::try_from(component)
            .map_err(|_| EnvError::address(format!("cannot append {} to {}", component, self)))?;
        Ok(self.join(component))
    }

    /// Returns the address components.
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Number of components (depth in the hierarchy).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the backbone address.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Component at `index`, if present.
    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    /// Local id of this node inside its parent.
    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Address of the enclosing subnetwork.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Length of the shared leading run of components.
    pub fn common_prefix_len(&self, other: &Address) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// True when `other` lies in the same local network as `self`.
    ///
    /// The prefix match must cover at least `len(self) - 1` components, so two
    /// siblings (same parent, different last component) match, and so does any
    /// address nested below a sibling.
    pub fn is_subnetwork_of(&self, other: &Address) -> bool {
        self.common_prefix_len(other) >= self.len().saturating_sub(1)
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &Address) -> bool {
        self.len() < other.len() && other.0.starts_with(&self.0)
    }
}

impl From<Vec<u32>> for Address {
    fn from(components: Vec<u32>) -> Self {
        Self(components)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<backbone>");
        }
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Address {
    type Err = EnvError;

    /// Parses dotted (`1.22.1.3`) or comma separated (`1, 22, 1, 3`) text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        trimmed
            .split(|c| c == '.' || c == ',')
            .map(|part| {
                let part = part.trim();
                part.parse::<u32>()
                    .map_err(|_| EnvError::address(format!("'{}' in '{}' is not a local id", part, s)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
