use serde_json::{json, Map, Value};

use crate::codec::{PrimitiveShape, TechniqueCache, TechniqueId, TechniqueKey, TextureId};
use crate::content::TileDisplayParams;

pub const SPECULAR_EXPONENT: f64 = 0.9 * 48.0;
pub const SPECULAR_COLOR: [f64; 3] = [1.0, 1.0, 1.0];
pub const POLYLINE_FEATHER: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

impl MaterialId {
    pub fn name(&self) -> String {
        format!("material_{}", self.0)
    }
}

/// Technique key for a display as actually drawn: lighting needs normals,
/// texturing needs UVs and a mesh.
pub fn technique_key(
    display: &TileDisplayParams,
    shape: PrimitiveShape,
    has_normals: bool,
    has_uvs: bool,
    batched: bool,
) -> TechniqueKey {
    let mesh = shape == PrimitiveShape::Mesh;
    TechniqueKey {
        shape,
        textured: mesh && display.is_textured() && has_uvs,
        transparent: display.is_transparent(),
        unlit: !mesh || display.ignore_lighting || !has_normals,
        batched,
    }
}

#[derive(Debug)]
struct MaterialEntry {
    display: TileDisplayParams,
    technique: TechniqueId,
    texture: Option<TextureId>,
}

/// Materials of one scene. Identical (display, technique, texture) triples share an entry.
#[derive(Debug, Default)]
pub struct MaterialTable {
    entries: Vec<MaterialEntry>,
}

impl MaterialTable {
    pub fn new() -> Self {
        MaterialTable {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_insert(
        &mut self,
        display: &TileDisplayParams,
        technique: TechniqueId,
        texture: Option<TextureId>,
    ) -> MaterialId {
        if let Some(i) = self.entries.iter().position(|e| {
            e.technique == technique && e.texture == texture && e.display == *display
        }) {
            return MaterialId(i);
        }
        self.entries.push(MaterialEntry {
            display: display.clone(),
            technique,
            texture,
        });
        MaterialId(self.entries.len() - 1)
    }

    pub fn emit(&self, techniques: &TechniqueCache) -> Map<String, Value> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let key = techniques.key(e.technique);
                let mut values = Map::new();

                match e.texture {
                    Some(tex) if key.textured => {
                        values.insert("tex".into(), json!(tex.name()));
                    }
                    _ => {
                        values.insert("color".into(), json!(e.display.color.to_floats()));
                    }
                }
                if key.lit() {
                    values.insert("specularExponent".into(), json!(SPECULAR_EXPONENT));
                    values.insert("specularColor".into(), json!(SPECULAR_COLOR));
                }
                if key.shape == PrimitiveShape::Polyline {
                    values.insert(
                        "halfWidth".into(),
                        json!(e.display.line_width as f64 / 2.0),
                    );
                    values.insert("feather".into(), json!(POLYLINE_FEATHER));
                }

                let mut material = json!({
                    "technique": techniques.technique_name(e.technique),
                    "values": values,
                });
                if let Some(id) = e.display.material_id {
                    material["materialId"] = json!(id.to_string());
                }
                (MaterialId(i).name(), material)
            })
            .collect()
    }
}
