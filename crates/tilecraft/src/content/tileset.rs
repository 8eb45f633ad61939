use cgmath::Matrix4;
use serde::{Deserialize, Serialize};

use crate::content::{BoundingVolume, Range3, TileNode};
use crate::helpers::{is_identity, matrix_to_column_major, TileError, TileResult};

pub const TILESET_VERSION: &str = "0.0";
pub const REFINE_REPLACE: &str = "REPLACE";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TilesetAsset {
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TileContentJson {
    pub url: String,
    #[serde(rename = "boundingVolume", skip_serializing_if = "Option::is_none", default)]
    pub bounding_volume: Option<BoundingVolume>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TileJson {
    #[serde(rename = "boundingVolume", skip_serializing_if = "Option::is_none", default)]
    pub bounding_volume: Option<BoundingVolume>,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub refine: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<TileContentJson>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<Vec<TileJson>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transform: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TilesetDocument {
    pub asset: TilesetAsset,
    pub root: TileJson,
}

impl TilesetDocument {
    pub fn to_json_bytes(&self) -> TileResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| TileError::SceneDataError(e.to_string()))
    }
}

/// Emits the tileset JSON tree from a node tree whose content has been published.
#[derive(Debug, Default, Clone)]
pub struct TilesetTreeBuilder {
    root_transform: Option<Matrix4<f64>>,
}

impl TilesetTreeBuilder {
    pub fn new() -> Self {
        TilesetTreeBuilder {
            root_transform: None,
        }
    }

    pub fn with_root_transform(mut self, transform: Matrix4<f64>) -> Self {
        self.root_transform = Some(transform);
        self
    }

    /// Own published content range, when the node has content.
    fn published(node: &TileNode) -> Range3 {
        match (&node.published_range, &node.content_url) {
            (Some(r), Some(_)) if !node.is_empty => *r,
            _ => Range3::null(),
        }
    }

    /// Output range of `node` and its JSON, or a null range when the subtree is pruned.
    fn build_node(node: &TileNode) -> (Range3, Option<TileJson>) {
        let mut children = Vec::new();
        let mut union = Self::published(node);
        for child in &node.children {
            let (range, json) = Self::build_node(child);
            if let Some(json) = json {
                union = union.union(&range);
                children.push(json);
            }
        }

        // a node without an authored range is bounded by what it holds
        let output = if node.range.is_null() {
            union
        } else {
            node.range.intersection(&union)
        };
        if output.is_null() {
            return (Range3::null(), None);
        }

        let content = match &node.content_url {
            Some(url) if !Self::published(node).is_null() => {
                let published = Self::published(node);
                let tight = if node.range.is_null() {
                    published
                } else {
                    node.range.intersection(&published)
                };
                Some(TileContentJson {
                    url: url.clone(),
                    bounding_volume: BoundingVolume::from_range(&tight),
                })
            }
            _ => None,
        };

        let json = TileJson {
            bounding_volume: BoundingVolume::from_range(&output),
            geometric_error: node.tolerance,
            refine: REFINE_REPLACE.to_string(),
            content,
            children: if children.is_empty() {
                None
            } else {
                Some(children)
            },
            transform: None,
        };
        (output, Some(json))
    }

    pub fn output_range(node: &TileNode) -> Range3 {
        Self::build_node(node).0
    }

    pub fn build(&self, root: &TileNode) -> TilesetDocument {
        let (range, json) = Self::build_node(root);
        let mut root_json = json.unwrap_or_else(|| TileJson {
            bounding_volume: None,
            geometric_error: root.tolerance,
            refine: REFINE_REPLACE.to_string(),
            content: None,
            children: None,
            transform: None,
        });
        if range.is_null() {
            log::warn!("tileset has no published content");
        }
        if let Some(t) = self.root_transform.filter(|t| !is_identity(t)) {
            root_json.transform = Some(matrix_to_column_major(&t).to_vec());
        }
        TilesetDocument {
            asset: TilesetAsset {
                version: TILESET_VERSION.to_string(),
            },
            root: root_json,
        }
    }
}
