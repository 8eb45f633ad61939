use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::{json, Map, Value};

use crate::codec::{
    build_primitive, BatchIdMap, ComponentType, Primitive, SceneParts, TextureSettings,
    BINARY_BUFFER_NAME, QUANTIZED_EXTENSION,
};
use crate::content::TileMesh;
use crate::helpers::{TileError, TileResult};

pub const GLB_MAGIC: &[u8; 4] = b"glTF";
pub const GLB_VERSION: u32 = 1;
pub const GLB_HEADER_LENGTH: usize = 20;
/// Scene format tag for a JSON scene document.
pub const GLB_FORMAT_JSON: u32 = 0;

pub const MESH_NAME: &str = "Mesh";
pub const ROOT_NODE_NAME: &str = "rootNode";
pub const SCENE_NAME: &str = "defaultScene";

/// Collects the primitives of one scene and emits it as a binary glTF blob.
#[derive(Debug)]
pub struct SceneAssembler {
    parts: SceneParts,
    primitives: Vec<Primitive>,
    tolerance: f64,
    settings: TextureSettings,
}

impl SceneAssembler {
    pub fn new(tolerance: f64, settings: TextureSettings) -> Self {
        SceneAssembler {
            parts: SceneParts::default(),
            primitives: Vec::new(),
            tolerance,
            settings,
        }
    }

    /// Adds one mesh. Returns false when the mesh produced no primitive.
    pub fn add_mesh(&mut self, mesh: &TileMesh, batch: Option<&mut BatchIdMap>) -> TileResult<bool> {
        match build_primitive(&mut self.parts, mesh, batch, self.tolerance, &self.settings)? {
            Some(p) => {
                self.primitives.push(p);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn technique_count(&self) -> usize {
        self.parts.techniques.len()
    }

    fn primitive_json(p: &Primitive) -> Value {
        let attributes: Map<String, Value> = p
            .attributes
            .iter()
            .map(|(s, a)| (s.as_str().to_string(), json!(a.name())))
            .collect();
        json!({
            "attributes": attributes,
            "indices": p.indices.name(),
            "material": p.material.name(),
            "mode": p.mode.gl(),
        })
    }

    /// Builds the scene document, appending shader sources to the buffer.
    fn document(parts: &mut SceneParts, primitives: &[Primitive]) -> Value {
        let techniques = parts.techniques.emit(&mut parts.buffers);
        let (textures, images, samplers) = parts.textures.emit();
        let materials = parts.materials.emit(&parts.techniques);

        parts.buffers.buffer.pad_to(4);

        let wide_indices = primitives
            .iter()
            .any(|p| parts.buffers.accessor(p.indices).component_type == ComponentType::UnsignedInt);
        let primitives: Vec<Value> = primitives.iter().map(Self::primitive_json).collect();

        let mut doc = json!({
            "asset": {
                "generator": concat!("tilecraft ", env!("CARGO_PKG_VERSION")),
                "version": "1.0",
                "premultipliedAlpha": true,
                "profile": { "api": "WebGL", "version": "1.0.2" },
            },
            "scene": SCENE_NAME,
            "scenes": { SCENE_NAME: { "nodes": [ROOT_NODE_NAME] } },
            "nodes": { ROOT_NODE_NAME: { "children": [], "meshes": [MESH_NAME] } },
            "meshes": { MESH_NAME: { "primitives": primitives } },
            "accessors": parts.buffers.accessors_json(),
            "bufferViews": parts.buffers.views_json(),
            "buffers": { BINARY_BUFFER_NAME: {
                "byteLength": parts.buffers.buffer.len(),
                "type": "arraybuffer",
                "uri": "data:,",
            }},
            "materials": materials,
            "techniques": techniques.techniques,
            "programs": techniques.programs,
            "shaders": techniques.shaders,
            "extensionsUsed": ["KHR_binary_glTF", QUANTIZED_EXTENSION],
        });
        if !textures.is_empty() {
            doc["textures"] = Value::Object(textures);
            doc["images"] = Value::Object(images);
            doc["samplers"] = Value::Object(samplers);
        }
        if wide_indices {
            doc["glExtensionsUsed"] = json!(["OES_element_index_uint"]);
        }
        doc
    }

    /// Emits the binary glTF blob. An assembler without primitives is `NoGeometry`.
    pub fn into_glb(self) -> TileResult<Vec<u8>> {
        if self.primitives.is_empty() {
            return Err(TileError::NoGeometry);
        }
        let mut parts = self.parts;
        let doc = Self::document(&mut parts, &self.primitives);
        let binary = parts.buffers.buffer.freeze();

        let json = serde_json::to_vec(&doc).map_err(|e| TileError::SceneDataError(e.to_string()))?;
        let mut out = Vec::with_capacity(GLB_HEADER_LENGTH + json.len() + binary.len() + 4);
        write_glb(&json, &binary, &mut out)?;
        Ok(out)
    }
}

/// Frames a scene document and its binary body. The JSON is space padded to 4 bytes.
pub fn write_glb(json: &[u8], binary: &[u8], out: &mut Vec<u8>) -> TileResult<()> {
    let json_padding = (4 - json.len() % 4) % 4;
    let json_len = json.len() + json_padding;
    let total = GLB_HEADER_LENGTH + json_len + binary.len();

    out.extend_from_slice(GLB_MAGIC);
    out.write_u32::<LittleEndian>(GLB_VERSION)?;
    out.write_u32::<LittleEndian>(total as u32)?;
    out.write_u32::<LittleEndian>(json_len as u32)?;
    out.write_u32::<LittleEndian>(GLB_FORMAT_JSON)?;
    out.extend_from_slice(json);
    out.extend(std::iter::repeat(b' ').take(json_padding));
    out.extend_from_slice(binary);
    Ok(())
}
