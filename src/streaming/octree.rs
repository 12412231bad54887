//! Octree metadata
//!
//! The hierarchy a tile provider publishes up front: one entry per node with
//! its bounds, the number of points it renders at its own LOD and the ids of
//! its children. Matches the provider's JSON document field for field.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use crate::streaming::node_id::NodeId;

/// One node of the octree hierarchy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OctreeNodeMetadata {
    pub node_id: NodeId,
    pub level: u32,
    pub bounds_low: [f32; 3],
    pub bounds_high: [f32; 3],
    /// Points rendered when this node is selected (not a subtree total)
    pub point_count: u64,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

impl OctreeNodeMetadata {
    pub fn new(node_id: NodeId, bounds: Aabb, point_count: u64) -> Self {
        Self {
            level: node_id.level(),
            node_id,
            bounds_low: bounds.min.to_array(),
            bounds_high: bounds.max.to_array(),
            point_count,
            children: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            Vec3::from_array(self.bounds_low),
            Vec3::from_array(self.bounds_high),
        )
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Whole-hierarchy metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OctreeMetadata {
    pub root_id: NodeId,
    pub bounds_low: [f32; 3],
    pub bounds_high: [f32; 3],
    pub total_points: u64,
    pub max_depth: u32,
    pub node_count: usize,
    pub nodes: HashMap<NodeId, OctreeNodeMetadata>,
}

impl Default for OctreeMetadata {
    fn default() -> Self {
        Self {
            root_id: NodeId::root(),
            bounds_low: [0.0; 3],
            bounds_high: [0.0; 3],
            total_points: 0,
            max_depth: 0,
            node_count: 0,
            nodes: HashMap::new(),
        }
    }
}

/// Structural problem found by [`OctreeMetadata::validate`]
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataIssue {
    MissingRoot(NodeId),
    MissingChild { parent: NodeId, child: NodeId },
    ChildNotContained { parent: NodeId, child: NodeId },
    LevelMismatch { node: NodeId, expected: u32, found: u32 },
}

impl fmt::Display for MetadataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoot(id) => write!(f, "root {id} not present in node table"),
            Self::MissingChild { parent, child } => {
                write!(f, "{parent} lists child {child} which has no entry")
            }
            Self::ChildNotContained { parent, child } => {
                write!(f, "bounds of {child} are not strictly inside {parent}")
            }
            Self::LevelMismatch { node, expected, found } => {
                write!(f, "{node} has level {found}, expected {expected}")
            }
        }
    }
}

impl OctreeMetadata {
    /// Parse the provider's metadata document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get(&self, id: &NodeId) -> Option<&OctreeNodeMetadata> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&OctreeNodeMetadata> {
        self.nodes.get(&self.root_id)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            Vec3::from_array(self.bounds_low),
            Vec3::from_array(self.bounds_high),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `id` that actually have an entry
    pub fn children_of<'a>(
        &'a self,
        node: &'a OctreeNodeMetadata,
    ) -> impl Iterator<Item = &'a OctreeNodeMetadata> + 'a {
        node.children.iter().filter_map(|c| self.nodes.get(c))
    }

    /// Check structural invariants; problems are reported, never fatal
    ///
    /// Readers tolerate every issue listed here (missing children are
    /// skipped), so the result is advisory.
    pub fn validate(&self) -> Vec<MetadataIssue> {
        let mut issues = Vec::new();
        if self.nodes.is_empty() {
            return issues;
        }
        if !self.nodes.contains_key(&self.root_id) {
            issues.push(MetadataIssue::MissingRoot(self.root_id.clone()));
        }

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &self.nodes[id];
            let parent_bounds = node.bounds();
            for child_id in &node.children {
                let Some(child) = self.nodes.get(child_id) else {
                    issues.push(MetadataIssue::MissingChild {
                        parent: id.clone(),
                        child: child_id.clone(),
                    });
                    continue;
                };
                let child_bounds = child.bounds();
                if !parent_bounds.contains_aabb(&child_bounds) || child_bounds == parent_bounds {
                    issues.push(MetadataIssue::ChildNotContained {
                        parent: id.clone(),
                        child: child_id.clone(),
                    });
                }
                if child.level != node.level + 1 {
                    issues.push(MetadataIssue::LevelMismatch {
                        node: child_id.clone(),
                        expected: node.level + 1,
                        found: child.level,
                    });
                }
            }
        }

        for issue in &issues {
            log::warn!("Octree metadata: {}", issue);
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "root_id": "r",
        "bounds_low": [-1.0, -1.0, -1.0],
        "bounds_high": [1.0, 1.0, 1.0],
        "total_points": 300,
        "max_depth": 1,
        "node_count": 2,
        "nodes": {
            "r": {
                "node_id": "r", "level": 0,
                "bounds_low": [-1.0, -1.0, -1.0], "bounds_high": [1.0, 1.0, 1.0],
                "point_count": 100, "children": ["r0", "r7"]
            },
            "r0": {
                "node_id": "r0", "level": 1,
                "bounds_low": [-1.0, -1.0, -1.0], "bounds_high": [0.0, 0.0, 0.0],
                "point_count": 200, "children": []
            }
        }
    }"#;

    #[test]
    fn test_parse_provider_document() {
        let meta = OctreeMetadata::from_json(SAMPLE).unwrap();
        assert_eq!(meta.root_id, NodeId::root());
        assert_eq!(meta.nodes.len(), 2);
        let root = meta.root().unwrap();
        assert_eq!(root.point_count, 100);
        assert_eq!(root.bounds().max_extent(), 2.0);
        assert_eq!(meta.children_of(root).count(), 1);
    }

    #[test]
    fn test_validate_reports_dangling_child() {
        let meta = OctreeMetadata::from_json(SAMPLE).unwrap();
        let issues = meta.validate();
        assert_eq!(
            issues,
            vec![MetadataIssue::MissingChild {
                parent: NodeId::root(),
                child: NodeId::from("r7"),
            }]
        );
    }

    #[test]
    fn test_validate_reports_escaping_child() {
        let mut meta = OctreeMetadata::from_json(SAMPLE).unwrap();
        meta.nodes.get_mut(&NodeId::root()).unwrap().children = vec![NodeId::from("r0")];
        meta.nodes.get_mut(&NodeId::from("r0")).unwrap().bounds_high = [0.0, 0.0, 2.0];
        let issues = meta.validate();
        assert!(matches!(issues.as_slice(), [MetadataIssue::ChildNotContained { .. }]));
    }

    #[test]
    fn test_empty_metadata_is_valid() {
        let meta = OctreeMetadata::default();
        assert!(meta.is_empty());
        assert!(meta.root().is_none());
        assert!(meta.validate().is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let meta = OctreeMetadata::from_json(SAMPLE).unwrap();
        let again = OctreeMetadata::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(again, meta);
    }
}
