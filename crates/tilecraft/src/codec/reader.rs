use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use cgmath::{Point3, Vector2, Vector3};
use log::error;
use serde_json::Value;

use crate::codec::{
    dequantize, oct_decode, AccessorType, ComponentType, ContainerKind, B3DM_HEADER_LENGTH,
    CONTAINER_VERSION, GLB_FORMAT_JSON, GLB_HEADER_LENGTH, GLB_MAGIC, GLB_VERSION,
    QUANTIZED_EXTENSION,
};
use crate::content::{ColorDef, EntityId, TextureImage, TileDisplayParams, TileMesh};
use crate::helpers::{MissingContext, ReadContext, TileError, TileResult};

/// A decoded primitive plus the element ids its batch ids resolved to.
#[derive(Debug, Clone)]
pub struct ReadMesh {
    pub mesh: TileMesh,
    pub element_ids: Option<Vec<String>>,
}

/// Reads a batched 3D model tile.
pub fn read_tile(data: impl Into<Bytes>) -> TileResult<Vec<ReadMesh>> {
    TileReader::new(data).read()
}

#[derive(Debug, Clone)]
pub struct TileReader {
    data: Bytes,
}

struct B3dmParts {
    batch_table: Option<Value>,
    glb: Bytes,
}

impl TileReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        TileReader { data: data.into() }
    }

    pub fn read(&self) -> TileResult<Vec<ReadMesh>> {
        let _span = tracing::debug_span!("read_tile", bytes = self.data.len()).entered();
        let parts = self.parse_b3dm()?;
        let (doc, binary) = parse_glb(&parts.glb)?;
        let scene = SceneDoc {
            json: &doc,
            bin: &binary,
        };
        scene.read_meshes(parts.batch_table.as_ref())
    }

    fn parse_b3dm(&self) -> TileResult<B3dmParts> {
        let data = &self.data;
        let mut cursor = Cursor::new(&data[..]);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).read_error("b3dm magic")?;
        if &magic != ContainerKind::B3dm.magic() {
            error!("Invalid b3dm magic header: {:?}", magic);
            return Err(TileError::InvalidHeader(format!("magic {:?}", magic)));
        }
        let version = cursor.read_u32::<LittleEndian>().read_error("b3dm version")?;
        if version != CONTAINER_VERSION {
            error!("Unsupported b3dm version: {}", version);
            return Err(TileError::InvalidHeader(format!("b3dm version {}", version)));
        }

        let length = cursor.read_u32::<LittleEndian>().read_error("b3dm length")? as usize;
        let batch_json_len = cursor.read_u32::<LittleEndian>().read_error("b3dm header")? as usize;
        let batch_bin_len = cursor.read_u32::<LittleEndian>().read_error("b3dm header")? as usize;
        let _batch_count = cursor.read_u32::<LittleEndian>().read_error("b3dm header")?;

        if length > data.len() {
            error!("b3dm declares {} bytes, have {}", length, data.len());
            return Err(TileError::ReadError(format!(
                "declared length {} exceeds {} available",
                length,
                data.len()
            )));
        }

        let json_start = B3DM_HEADER_LENGTH;
        let glb_start = json_start + batch_json_len + batch_bin_len;
        if glb_start > length {
            return Err(TileError::ReadError(format!(
                "batch table of {} bytes overruns tile of {}",
                batch_json_len + batch_bin_len,
                length
            )));
        }

        let batch_table = if batch_json_len > 0 {
            let v: Value = serde_json::from_slice(&data[json_start..json_start + batch_json_len])
                .batch_table_parse("batch table")?;
            Some(v)
        } else {
            None
        };

        Ok(B3dmParts {
            batch_table,
            glb: data.slice(glb_start..length),
        })
    }
}

/// Splits an embedded binary scene into its document and body.
pub fn parse_glb(glb: &Bytes) -> TileResult<(Value, Bytes)> {
    let total_len = glb.len();
    let mut cursor = Cursor::new(&glb[..]);

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).read_error("scene magic")?;
    if &magic != GLB_MAGIC {
        error!("Invalid scene magic header: {:?}", magic);
        return Err(TileError::InvalidHeader(format!("scene magic {:?}", magic)));
    }
    let version = cursor.read_u32::<LittleEndian>().read_error("scene version")?;
    if version != GLB_VERSION {
        error!("Unsupported scene version: {}", version);
        return Err(TileError::InvalidHeader(format!("scene version {}", version)));
    }
    let length = cursor.read_u32::<LittleEndian>().read_error("scene length")? as usize;
    let json_len = cursor.read_u32::<LittleEndian>().read_error("scene header")? as usize;
    let format = cursor.read_u32::<LittleEndian>().read_error("scene header")?;
    if format != GLB_FORMAT_JSON {
        error!("Unsupported scene format: {}", format);
        return Err(TileError::InvalidHeader(format!("scene format {}", format)));
    }

    if length > total_len || GLB_HEADER_LENGTH + json_len > length {
        error!(
            "Scene too small: declared {} json {} have {}",
            length, json_len, total_len
        );
        return Err(TileError::ReadError(format!(
            "scene declares {} bytes with {} of JSON, have {}",
            length, json_len, total_len
        )));
    }

    let json_end = GLB_HEADER_LENGTH + json_len;
    let doc: Value =
        serde_json::from_slice(&glb[GLB_HEADER_LENGTH..json_end]).scene_parse("scene JSON")?;
    Ok((doc, glb.slice(json_end..length)))
}

struct DecodedAccessor {
    values: Vec<f64>,
    accessor_type: AccessorType,
    component_type: ComponentType,
    count: usize,
}

struct SceneDoc<'a> {
    json: &'a Value,
    bin: &'a [u8],
}

impl<'a> SceneDoc<'a> {
    fn member(&self, section: &str, name: &str) -> TileResult<&'a Value> {
        self.json
            .get(section)
            .and_then(|s| s.get(name))
            .or_scene_data(&format!("{} has no member {}", section, name))
    }

    fn view_bytes(&self, view_name: &str) -> TileResult<&'a [u8]> {
        let view = self.member("bufferViews", view_name)?;
        let offset = view
            .get("byteOffset")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let length = view
            .get("byteLength")
            .and_then(|v| v.as_u64())
            .or_scene_data("bufferView without byteLength")? as usize;
        let end = match offset.checked_add(length) {
            Some(end) if end <= self.bin.len() => end,
            _ => {
                error!(
                    "bufferView {} at {} with {} bytes overruns buffer of {}",
                    view_name,
                    offset,
                    length,
                    self.bin.len()
                );
                return Err(TileError::ReadError(format!(
                    "bufferView {} overruns binary body",
                    view_name
                )));
            }
        };
        Ok(&self.bin[offset..end])
    }

    fn accessor(&self, name: &str) -> TileResult<DecodedAccessor> {
        let acc = self.member("accessors", name)?;
        let view_name = acc
            .get("bufferView")
            .and_then(|v| v.as_str())
            .or_scene_data("accessor without bufferView")?;
        let component_type = ComponentType::from_gl(
            acc.get("componentType")
                .and_then(|v| v.as_u64())
                .or_scene_data("accessor without componentType")?,
        )?;
        let accessor_type = AccessorType::parse(
            acc.get("type")
                .and_then(|v| v.as_str())
                .or_scene_data("accessor without type")?,
        )?;
        let count = acc
            .get("count")
            .and_then(|v| v.as_u64())
            .or_scene_data("accessor without count")? as usize;
        let offset = acc.get("byteOffset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;

        let view = self.view_bytes(view_name)?;
        let components = accessor_type.components();
        let end = count
            .checked_mul(components * component_type.size())
            .and_then(|needed| offset.checked_add(needed));
        let end = match end {
            Some(end) if end <= view.len() => end,
            _ => {
                error!(
                    "accessor {} with {} elements at {} overruns bufferView of {}",
                    name,
                    count,
                    offset,
                    view.len()
                );
                return Err(TileError::ReadError(format!(
                    "accessor {} exceeds its bufferView",
                    name
                )));
            }
        };

        let mut cursor = Cursor::new(&view[offset..end]);
        let mut raw = Vec::with_capacity(count * components);
        for _ in 0..count * components {
            let v = match component_type {
                ComponentType::UnsignedByte => cursor.read_u8().read_error("accessor data")? as f64,
                ComponentType::UnsignedShort => {
                    cursor.read_u16::<LittleEndian>().read_error("accessor data")? as f64
                }
                ComponentType::UnsignedInt => {
                    cursor.read_u32::<LittleEndian>().read_error("accessor data")? as f64
                }
                ComponentType::Float => {
                    cursor.read_f32::<LittleEndian>().read_error("accessor data")? as f64
                }
            };
            raw.push(v);
        }

        let values = match acc.get("extensions").and_then(|e| e.get(QUANTIZED_EXTENSION)) {
            Some(q) if component_type == ComponentType::UnsignedShort => {
                let min = number_array(q.get("decodedMin"), components)?;
                let max = number_array(q.get("decodedMax"), components)?;
                raw.iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let c = i % components;
                        dequantize(*v as u16, min[c], max[c])
                    })
                    .collect()
            }
            Some(_) => {
                return Err(TileError::SceneDataError(format!(
                    "quantized accessor {} is not 16-bit",
                    name
                )))
            }
            None => raw,
        };

        Ok(DecodedAccessor {
            values,
            accessor_type,
            component_type,
            count,
        })
    }

    fn display_params(&self, material_name: &str) -> TileResult<TileDisplayParams> {
        let material = self.member("materials", material_name)?;
        let values = material
            .get("values")
            .or_scene_data("material without values")?;

        let mut display = TileDisplayParams::default();
        if let Some(color) = values.get("color") {
            let c = number_array(Some(color), 4)?;
            display.color = ColorDef::from_floats([c[0], c[1], c[2], c[3]]);
        }
        if let Some(tex) = values.get("tex").and_then(|t| t.as_str()) {
            display.texture = Some(Arc::new(self.texture_image(tex)?));
        }
        if let Some(id) = material.get("materialId") {
            let s = id.as_str().or_scene_data("materialId is not a string")?;
            display.material_id = Some(s.parse::<u64>().scene_data("materialId")?);
        }
        let half_width = values.get("halfWidth").and_then(|v| v.as_f64());
        if let Some(hw) = half_width {
            display.line_width = (hw * 2.0).round().max(1.0) as u32;
        }
        display.ignore_lighting = half_width.is_none() && values.get("specularExponent").is_none();
        Ok(display)
    }

    fn texture_image(&self, texture_name: &str) -> TileResult<TextureImage> {
        let texture = self.member("textures", texture_name)?;
        let source = texture
            .get("source")
            .and_then(|s| s.as_str())
            .or_scene_data("texture without source")?;
        let image = self.member("images", source)?;
        let view = image
            .get("extensions")
            .and_then(|e| e.get("KHR_binary_glTF"))
            .and_then(|k| k.get("bufferView"))
            .and_then(|v| v.as_str())
            .or_scene_data("image without embedded bufferView")?;
        Ok(TextureImage::new(self.view_bytes(view)?.to_vec()))
    }

    fn read_meshes(&self, batch_table: Option<&Value>) -> TileResult<Vec<ReadMesh>> {
        let meshes = self
            .json
            .get("meshes")
            .and_then(|m| m.as_object())
            .or_scene_data("scene has no meshes")?;

        let elements: Option<Vec<String>> = batch_table
            .and_then(|t| t.get("element"))
            .and_then(|e| e.as_array())
            .map(|a| {
                a.iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            });

        let mut out = Vec::new();
        for mesh in meshes.values() {
            let primitives = mesh
                .get("primitives")
                .and_then(|p| p.as_array())
                .or_scene_data("mesh without primitives")?;
            for primitive in primitives {
                out.push(self.read_primitive(primitive, elements.as_deref())?);
            }
        }
        Ok(out)
    }

    fn attribute(&self, primitive: &Value, semantic: &str) -> TileResult<Option<DecodedAccessor>> {
        match primitive
            .get("attributes")
            .and_then(|a| a.get(semantic))
            .and_then(|a| a.as_str())
        {
            Some(name) => self.accessor(name).map(Some),
            None => Ok(None),
        }
    }

    fn read_primitive(&self, primitive: &Value, elements: Option<&[String]>) -> TileResult<ReadMesh> {
        let material = primitive
            .get("material")
            .and_then(|m| m.as_str())
            .or_scene_data("primitive without material")?;
        let display = self.display_params(material)?;

        let indices_name = primitive
            .get("indices")
            .and_then(|i| i.as_str())
            .or_scene_data("primitive without indices")?;
        let indices = self.accessor(indices_name)?;
        if indices.accessor_type != AccessorType::Scalar
            || !matches!(
                indices.component_type,
                ComponentType::UnsignedShort | ComponentType::UnsignedInt
            )
        {
            return Err(TileError::SceneDataError(
                "indices must be 16 or 32-bit scalars".into(),
            ));
        }
        let indices: Vec<u32> = indices.values.iter().map(|v| *v as u32).collect();

        let positions = self
            .attribute(primitive, "POSITION")?
            .or_scene_data("primitive without POSITION")?;
        if positions.accessor_type != AccessorType::Vec3 {
            return Err(TileError::SceneDataError("POSITION must be VEC3".into()));
        }
        let points: Vec<Point3<f64>> = positions
            .values
            .chunks_exact(3)
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        let vertex_count = positions.count;
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(TileError::SceneDataError(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }

        let batch_ids: Option<Vec<u32>> = match self.attribute(primitive, "BATCHID")? {
            Some(b) if b.count == vertex_count => Some(b.values.iter().map(|v| *v as u32).collect()),
            Some(b) => {
                log::warn!("BATCHID count {} != vertex count {}", b.count, vertex_count);
                None
            }
            None => None,
        };

        let mode = primitive.get("mode").and_then(|m| m.as_u64()).unwrap_or(4);
        let quads = primitive
            .get("attributes")
            .and_then(|a| a.get("_VERTEXDELTA"))
            .is_some();

        let mut mesh = TileMesh::new(Arc::new(display));
        let vertex_ids: Option<Vec<u32>>;
        match (mode, quads) {
            (4, false) => {
                if indices.len() % 3 != 0 {
                    return Err(TileError::SceneDataError(format!(
                        "{} triangle indices",
                        indices.len()
                    )));
                }
                mesh.triangles = indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
                mesh.points = points;
                if let Some(n) = self.attribute(primitive, "NORMAL")? {
                    mesh.normals = Some(decode_normals(&n)?);
                }
                if let Some(uv) = self.attribute(primitive, "TEXCOORD_0")? {
                    mesh.uvs = Some(
                        uv.values
                            .chunks_exact(2)
                            .map(|t| Vector2::new(t[0], t[1]))
                            .collect(),
                    );
                }
                vertex_ids = batch_ids;
            }
            (4, true) => {
                let (pts, lines, ids) = collapse_quads(&points, batch_ids.as_deref());
                mesh.points = pts;
                mesh.polylines = lines;
                vertex_ids = ids;
            }
            (1, _) => {
                if indices.len() % 2 != 0 {
                    return Err(TileError::SceneDataError(format!(
                        "{} line indices",
                        indices.len()
                    )));
                }
                mesh.points = points;
                mesh.polylines = chain_segments(indices.chunks_exact(2).map(|p| (p[0], p[1])));
                vertex_ids = batch_ids;
            }
            (m, _) => {
                return Err(TileError::SceneDataError(format!(
                    "unsupported primitive mode {}",
                    m
                )))
            }
        }

        let element_ids = match (vertex_ids, elements) {
            (Some(ids), Some(elements)) if ids.len() == mesh.points.len() => {
                let resolved: Option<Vec<String>> = ids
                    .iter()
                    .map(|&b| elements.get(b as usize).cloned())
                    .collect();
                if resolved.is_none() {
                    log::warn!("batch id outside the batch table's element array");
                }
                resolved
            }
            _ => None,
        };
        if let Some(ids) = &element_ids {
            mesh.entity_ids = ids.iter().map(|s| parse_entity_id(s)).collect();
        }

        Ok(ReadMesh { mesh, element_ids })
    }
}

fn number_array(v: Option<&Value>, n: usize) -> TileResult<Vec<f64>> {
    let arr = v
        .and_then(|v| v.as_array())
        .or_scene_data("expected a number array")?;
    if arr.len() < n {
        return Err(TileError::SceneDataError(format!(
            "expected {} numbers, found {}",
            n,
            arr.len()
        )));
    }
    arr.iter()
        .take(n)
        .map(|x| x.as_f64().or_scene_data("non-numeric array entry"))
        .collect()
}

fn decode_normals(n: &DecodedAccessor) -> TileResult<Vec<Vector3<f64>>> {
    match (n.accessor_type, n.component_type) {
        (AccessorType::Vec2, ComponentType::UnsignedByte) => Ok(n
            .values
            .chunks_exact(2)
            .map(|e| oct_decode([e[0] as u8, e[1] as u8]))
            .collect()),
        (AccessorType::Vec3, _) => Ok(n
            .values
            .chunks_exact(3)
            .map(|v| Vector3::new(v[0], v[1], v[2]))
            .collect()),
        (t, c) => Err(TileError::SceneDataError(format!(
            "unsupported NORMAL layout {:?}/{:?}",
            t, c
        ))),
    }
}

pub fn parse_entity_id(s: &str) -> Option<EntityId> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u64::from_str_radix(hex, 16).ok()
}

/// Splits index pairs into polylines: a new line starts whenever a pair does not continue the last.
pub fn chain_segments<I>(pairs: I) -> Vec<Vec<u32>>
where
    I: IntoIterator<Item = (u32, u32)>,
{
    let mut lines: Vec<Vec<u32>> = Vec::new();
    for (a, b) in pairs {
        match lines.last_mut() {
            Some(line) if line.last() == Some(&a) => line.push(b),
            _ => lines.push(vec![a, b]),
        }
    }
    lines
}

type CollapsedQuads = (Vec<Point3<f64>>, Vec<Vec<u32>>, Option<Vec<u32>>);

/// Undoes the writer's quad expansion: vertices 0 and 2 of each quad are a segment's ends.
fn collapse_quads(points: &[Point3<f64>], batch_ids: Option<&[u32]>) -> CollapsedQuads {
    let mut pts: Vec<Point3<f64>> = Vec::new();
    let mut ids: Vec<u32> = Vec::new();
    let mut pairs = Vec::new();
    for q in 0..points.len() / 4 {
        let (s, e) = (q * 4, q * 4 + 2);
        let start = match pts.last() {
            Some(last) if *last == points[s] && !pairs.is_empty() => pts.len() as u32 - 1,
            _ => {
                pts.push(points[s]);
                if let Some(b) = batch_ids {
                    ids.push(b[s]);
                }
                pts.len() as u32 - 1
            }
        };
        pts.push(points[e]);
        if let Some(b) = batch_ids {
            ids.push(b[e]);
        }
        pairs.push((start, pts.len() as u32 - 1));
    }
    let ids = batch_ids.map(|_| ids);
    (pts, chain_segments(pairs), ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaining_splits_on_gaps() {
        let lines = chain_segments(vec![(0, 1), (1, 2), (5, 6), (6, 7), (2, 3)]);
        assert_eq!(lines, vec![vec![0, 1, 2], vec![5, 6, 7], vec![2, 3]]);
    }

    #[test]
    fn entity_ids_parse_from_hex() {
        assert_eq!(parse_entity_id("0x1a"), Some(26));
        assert_eq!(parse_entity_id("26"), None);
    }

    #[test]
    fn wrong_magic_is_invalid_header() {
        let mut bytes = b"i3dm".to_vec();
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(read_tile(bytes), Err(TileError::InvalidHeader(_))));
    }

    #[test]
    fn short_data_is_read_error() {
        assert!(matches!(
            read_tile(b"b3d".to_vec()),
            Err(TileError::ReadError(_))
        ));

        let mut bytes = b"b3dm".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(read_tile(bytes), Err(TileError::ReadError(_))));
    }

    #[test]
    fn bad_version_is_invalid_header() {
        let mut bytes = b"b3dm".to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(read_tile(bytes), Err(TileError::InvalidHeader(_))));
    }
}
