use std::sync::Arc;

use cgmath::{Point3, Vector2, Vector3};

use crate::content::Range3;
use crate::helpers::{hash_bytes, TileError, TileResult};

/// Opaque 64-bit entity identifier. Zero is "no identifier".
pub type EntityId = u64;
pub const INVALID_ENTITY_ID: EntityId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorDef {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ColorDef {
    pub const WHITE: ColorDef = ColorDef::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        ColorDef { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        ColorDef { r, g, b, a }
    }

    pub fn is_transparent(&self) -> bool {
        self.a < 255
    }

    pub fn to_floats(&self) -> [f64; 4] {
        [
            self.r as f64 / 255.0,
            self.g as f64 / 255.0,
            self.b as f64 / 255.0,
            self.a as f64 / 255.0,
        ]
    }

    pub fn from_floats(rgba: [f64; 4]) -> Self {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        ColorDef::rgba(c(rgba[0]), c(rgba[1]), c(rgba[2]), c(rgba[3]))
    }
}

/// Encoded image bytes (PNG or JPEG) with a content-derived identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    bytes: Vec<u8>,
    identity: u64,
}

impl TextureImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        let identity = hash_bytes(&bytes);
        TextureImage { bytes, identity }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileDisplayParams {
    pub color: ColorDef,
    pub material_id: Option<u64>,
    pub texture: Option<Arc<TextureImage>>,
    pub ignore_lighting: bool,
    /// Raster line width in pixels.
    pub line_width: u32,
}

impl Default for TileDisplayParams {
    fn default() -> Self {
        TileDisplayParams {
            color: ColorDef::WHITE,
            material_id: None,
            texture: None,
            ignore_lighting: false,
            line_width: 1,
        }
    }
}

impl TileDisplayParams {
    pub fn from_color(color: ColorDef) -> Self {
        TileDisplayParams {
            color,
            ..Default::default()
        }
    }

    pub fn is_textured(&self) -> bool {
        self.texture.is_some()
    }

    pub fn is_transparent(&self) -> bool {
        self.color.is_transparent()
    }
}

/// One batch of geometry sharing a display. Holds triangles or polylines, never both.
#[derive(Debug, Clone)]
pub struct TileMesh {
    pub points: Vec<Point3<f64>>,
    pub normals: Option<Vec<Vector3<f64>>>,
    pub uvs: Option<Vec<Vector2<f64>>>,
    pub triangles: Vec<[u32; 3]>,
    pub polylines: Vec<Vec<u32>>,
    pub entity_ids: Option<Vec<EntityId>>,
    pub display: Arc<TileDisplayParams>,
}

impl TileMesh {
    pub fn new(display: Arc<TileDisplayParams>) -> Self {
        TileMesh {
            points: Vec::new(),
            normals: None,
            uvs: None,
            triangles: Vec::new(),
            polylines: Vec::new(),
            entity_ids: None,
            display,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.polylines.iter().all(|p| p.len() < 2)
    }

    pub fn is_polyline(&self) -> bool {
        !self.polylines.is_empty()
    }

    pub fn point_range(&self) -> Range3 {
        Range3::from_points(&self.points)
    }

    /// True when every vertex carries an entity id.
    pub fn has_vertex_entity_ids(&self) -> bool {
        matches!(&self.entity_ids, Some(ids) if ids.len() == self.points.len())
    }

    pub fn validate(&self) -> TileResult<()> {
        if !self.triangles.is_empty() && !self.polylines.is_empty() {
            return Err(TileError::SceneDataError(
                "mesh carries both triangles and polylines".into(),
            ));
        }

        let n = self.points.len();
        if let Some(normals) = &self.normals {
            if normals.len() != n {
                return Err(TileError::SceneDataError(format!(
                    "{} normals for {} points",
                    normals.len(),
                    n
                )));
            }
        }
        if let Some(uvs) = &self.uvs {
            if uvs.len() != n {
                return Err(TileError::SceneDataError(format!(
                    "{} uvs for {} points",
                    uvs.len(),
                    n
                )));
            }
        }

        let out_of_range = self
            .triangles
            .iter()
            .flat_map(|t| t.iter())
            .chain(self.polylines.iter().flat_map(|p| p.iter()))
            .find(|&&i| i as usize >= n);
        if let Some(i) = out_of_range {
            return Err(TileError::SceneDataError(format!(
                "index {} out of range for {} points",
                i, n
            )));
        }
        Ok(())
    }
}

/// One placement of an instanced part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartInstance {
    pub position: Point3<f64>,
    /// (up, right) when the instance is rotated.
    pub orientation: Option<(Vector3<f64>, Vector3<f64>)>,
    pub entity_id: EntityId,
}

/// Geometry shared by many placements.
#[derive(Debug, Clone)]
pub struct InstancedPart {
    pub meshes: Vec<TileMesh>,
    pub instances: Vec<PartInstance>,
}

impl InstancedPart {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() || self.meshes.iter().all(|m| m.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TileGeometry {
    pub meshes: Vec<TileMesh>,
    pub parts: Vec<InstancedPart>,
}

impl TileGeometry {
    pub fn from_meshes(meshes: Vec<TileMesh>) -> Self {
        TileGeometry {
            meshes,
            parts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.iter().all(|m| m.is_empty()) && self.parts.iter().all(|p| p.is_empty())
    }
}

/// Node of the level-of-detail hierarchy.
#[derive(Debug, Clone)]
pub struct TileNode {
    pub range: Range3,
    pub tolerance: f64,
    pub children: Vec<TileNode>,
    /// Node has no content of its own.
    pub is_empty: bool,
    pub sibling_index: usize,
    /// Directory (relative to the tileset) holding this subtree's files.
    pub subdirectory: Option<String>,
    pub published_range: Option<Range3>,
    pub content_url: Option<String>,
}

impl TileNode {
    pub fn new(range: Range3, tolerance: f64) -> Self {
        TileNode {
            range,
            tolerance,
            children: Vec::new(),
            is_empty: false,
            sibling_index: 0,
            subdirectory: None,
            published_range: None,
            content_url: None,
        }
    }

    pub fn empty(range: Range3, tolerance: f64) -> Self {
        TileNode {
            is_empty: true,
            ..TileNode::new(range, tolerance)
        }
    }

    pub fn add_child(&mut self, mut child: TileNode) -> &mut TileNode {
        child.sibling_index = self.children.len();
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Suffix for a child given this node's suffix: two decimal digits per level.
    pub fn child_suffix(parent_suffix: &str, sibling_index: usize) -> String {
        format!("{}{:02}", parent_suffix, sibling_index)
    }

    pub fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(|c| c.count_nodes()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri_mesh() -> TileMesh {
        let mut m = TileMesh::new(Arc::new(TileDisplayParams::default()));
        m.points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        m.triangles = vec![[0, 1, 2]];
        m
    }

    #[test]
    fn mesh_validation() {
        let mut m = tri_mesh();
        assert!(m.validate().is_ok());

        m.polylines = vec![vec![0, 1]];
        assert!(matches!(m.validate(), Err(TileError::SceneDataError(_))));

        let mut m = tri_mesh();
        m.triangles.push([0, 1, 3]);
        assert!(m.validate().is_err());

        let mut m = tri_mesh();
        m.normals = Some(vec![Vector3::new(0.0, 0.0, 1.0)]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn color_float_conversion() {
        let c = ColorDef::rgba(255, 0, 0, 128);
        assert!(c.is_transparent());
        assert_eq!(ColorDef::from_floats(c.to_floats()), c);
        assert!(!ColorDef::rgb(1, 2, 3).is_transparent());
    }

    #[test]
    fn children_get_sibling_indices() {
        let mut root = TileNode::new(Range3::null(), 1.0);
        root.add_child(TileNode::empty(Range3::null(), 0.5));
        let second = root.add_child(TileNode::empty(Range3::null(), 0.5));
        second.add_child(TileNode::new(Range3::null(), 0.1));
        assert_eq!(root.children[1].sibling_index, 1);
        assert_eq!(TileNode::child_suffix("01", 3), "0103");
        assert_eq!(root.count_nodes(), 4);
    }

    #[test]
    fn texture_identity_follows_bytes() {
        let a = TextureImage::new(vec![1, 2, 3]);
        let b = TextureImage::new(vec![1, 2, 3]);
        let c = TextureImage::new(vec![3, 2, 1]);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }
}
