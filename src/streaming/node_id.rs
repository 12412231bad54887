//! Octree node path codes
//!
//! A node id is `"r"` for the root followed by one octant digit `0..=7` per
//! level. Bit 0 of a digit selects the high x half, bit 1 high y, bit 2
//! high z. Ancestry is therefore a strict prefix relation.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Leading character of every well-formed node id
pub const ROOT_ID: &str = "r";

/// Path-coded octree node identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// The root node
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Parse a well-formed id; `None` for anything else
    pub fn parse(s: &str) -> Option<Self> {
        let id = Self(s.to_string());
        id.is_well_formed().then_some(id)
    }

    /// Wrap any string without validation (provider ids are taken as-is)
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `"r"` followed only by digits `0..=7`
    pub fn is_well_formed(&self) -> bool {
        match self.0.strip_prefix(ROOT_ID) {
            Some(rest) => rest.bytes().all(|b| (b'0'..=b'7').contains(&b)),
            None => false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// Depth below the root (root is level 0)
    pub fn level(&self) -> u32 {
        self.0.len().saturating_sub(ROOT_ID.len()) as u32
    }

    /// Octant digits from the root downwards
    pub fn octants(&self) -> impl Iterator<Item = u8> + '_ {
        self.0
            .bytes()
            .skip(ROOT_ID.len())
            .filter(|b| (b'0'..=b'7').contains(b))
            .map(|b| b - b'0')
    }

    /// Child id in `octant` (0-7)
    pub fn child(&self, octant: u8) -> Self {
        debug_assert!(octant < 8, "octant out of range: {octant}");
        let mut id = self.0.clone();
        id.push(char::from(b'0' + (octant & 7)));
        Self(id)
    }

    /// Parent id; `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= ROOT_ID.len() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_string()))
    }

    /// Strict ancestor test (a node is not its own ancestor)
    pub fn is_ancestor_of(&self, other: &NodeId) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::from_raw(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root() {
        let root = NodeId::root();
        assert!(root.is_root());
        assert_eq!(root.level(), 0);
        assert!(root.parent().is_none());
        assert_eq!(root.to_string(), "r");
    }

    #[test]
    fn test_child_and_parent() {
        let id = NodeId::root().child(3).child(7);
        assert_eq!(id.as_str(), "r37");
        assert_eq!(id.level(), 2);
        assert_eq!(id.octants().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(id.parent().unwrap().as_str(), "r3");
    }

    #[test]
    fn test_ancestry_is_strict_prefix() {
        let a = NodeId::from("r1");
        let b = NodeId::from("r12");
        let c = NodeId::from("r2");
        assert!(a.is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&c));
        assert!(NodeId::root().is_ancestor_of(&c));
    }

    #[test]
    fn test_parse() {
        assert!(NodeId::parse("r0127").is_some());
        assert!(NodeId::parse("r8").is_none());
        assert!(NodeId::parse("x01").is_none());
        assert!(NodeId::parse("../r0").is_none());
        assert!(NodeId::parse("").is_none());
    }

    #[test]
    fn test_serde_is_plain_string() {
        let id = NodeId::from("r04");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r04\"");
        let back: NodeId = serde_json::from_str("\"r04\"").unwrap();
        assert_eq!(back, id);
    }
}
