//! Tile payloads
//!
//! A [`Tile`] is the point data for one octree node. [`TileData`] is the flat
//! wire shape providers serve (`positions: [x0, y0, z0, x1, ...]`); turning
//! it into a `Tile` checks every array length against `point_count`.

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Vec3;
use crate::streaming::node_id::NodeId;

/// Per-point annotation label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PointLabel {
    Unlabeled = 0,
    Solid = 1,
    Empty = 2,
}

impl PointLabel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unlabeled),
            1 => Some(Self::Solid),
            2 => Some(Self::Empty),
            _ => None,
        }
    }
}

/// Decoded point data of one octree node
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub node_id: NodeId,
    pub point_count: usize,
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub labels: Option<Vec<u8>>,
}

impl Tile {
    pub fn new(node_id: NodeId, positions: Vec<Vec3>) -> Self {
        Self {
            node_id,
            point_count: positions.len(),
            positions,
            normals: None,
            labels: None,
        }
    }

    /// Attach normals; ignored when the count does not match
    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        if normals.len() == self.positions.len() {
            self.normals = Some(normals);
        } else {
            log::warn!(
                "Tile {}: {} normals for {} points, dropping normals",
                self.node_id,
                normals.len(),
                self.positions.len()
            );
        }
        self
    }

    pub fn label(&self, index: usize) -> Option<PointLabel> {
        self.labels
            .as_ref()
            .and_then(|l| l.get(index))
            .and_then(|&v| PointLabel::from_u8(v))
    }

    /// Flatten into the wire shape
    pub fn to_data(&self) -> TileData {
        TileData {
            node_id: self.node_id.clone(),
            point_count: self.point_count,
            positions: flatten(&self.positions),
            normals: self.normals.as_deref().map(flatten),
            labels: self.labels.clone(),
        }
    }
}

/// Wire shape of a tile document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    pub node_id: NodeId,
    pub point_count: usize,
    pub positions: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<u8>>,
}

impl TryFrom<TileData> for Tile {
    type Error = Error;

    fn try_from(data: TileData) -> Result<Self, Self::Error> {
        let invalid = |reason: String| Error::InvalidTile {
            node_id: data.node_id.to_string(),
            reason,
        };

        if data.positions.len() != data.point_count * 3 {
            return Err(invalid(format!(
                "{} position values for {} points",
                data.positions.len(),
                data.point_count
            )));
        }
        if let Some(normals) = &data.normals {
            if normals.len() != data.point_count * 3 {
                return Err(invalid(format!(
                    "{} normal values for {} points",
                    normals.len(),
                    data.point_count
                )));
            }
        }
        if let Some(labels) = &data.labels {
            if labels.len() != data.point_count {
                return Err(invalid(format!(
                    "{} labels for {} points",
                    labels.len(),
                    data.point_count
                )));
            }
        }

        Ok(Tile {
            positions: unflatten(&data.positions),
            normals: data.normals.as_deref().map(unflatten),
            labels: data.labels,
            point_count: data.point_count,
            node_id: data.node_id,
        })
    }
}

fn flatten(v: &[Vec3]) -> Vec<f32> {
    v.iter().flat_map(|p| p.to_array()).collect()
}

fn unflatten(v: &[f32]) -> Vec<Vec3> {
    v.chunks_exact(3).map(Vec3::from_slice).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(point_count: usize, positions: Vec<f32>) -> TileData {
        TileData {
            node_id: NodeId::from("r3"),
            point_count,
            positions,
            normals: None,
            labels: None,
        }
    }

    #[test]
    fn test_decode_wire_tile() {
        let json = r#"{
            "node_id": "r3", "point_count": 2,
            "positions": [0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            "labels": [0, 2]
        }"#;
        let data: TileData = serde_json::from_str(json).unwrap();
        let tile = Tile::try_from(data).unwrap();
        assert_eq!(tile.point_count, 2);
        assert_eq!(tile.positions[1], Vec3::new(3.0, 4.0, 5.0));
        assert!(tile.normals.is_none());
        assert_eq!(tile.label(1), Some(PointLabel::Empty));
        assert_eq!(tile.label(5), None);
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let err = Tile::try_from(data(3, vec![0.0; 6])).unwrap_err();
        assert!(matches!(err, Error::InvalidTile { .. }));

        let mut bad_normals = data(2, vec![0.0; 6]);
        bad_normals.normals = Some(vec![0.0; 5]);
        assert!(Tile::try_from(bad_normals).is_err());

        let mut bad_labels = data(2, vec![0.0; 6]);
        bad_labels.labels = Some(vec![1]);
        assert!(Tile::try_from(bad_labels).is_err());
    }

    #[test]
    fn test_wire_roundtrip_keeps_normals() {
        let tile = Tile::new(NodeId::from("r01"), vec![Vec3::X, Vec3::Y])
            .with_normals(vec![Vec3::Z, Vec3::Z]);
        let back = Tile::try_from(tile.to_data()).unwrap();
        assert_eq!(back, tile);
    }

    #[test]
    fn test_mismatched_normals_dropped() {
        let tile = Tile::new(NodeId::root(), vec![Vec3::ZERO; 3]).with_normals(vec![Vec3::Z]);
        assert!(tile.normals.is_none());
    }
}
