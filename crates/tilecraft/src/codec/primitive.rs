use cgmath::{InnerSpace, Point3, Vector2, Vector3};

use crate::codec::{
    encode_attribute, encode_batch_ids, encode_indices, required_texture_size, technique_key,
    AccessorId, BatchIdMap, Encoding, MaterialId, MaterialTable, PrimitiveShape, SceneBuffers,
    TechniqueCache, TextureCache, TextureSettings,
};
use crate::content::{Range3, TileMesh, INVALID_ENTITY_ID};
use crate::helpers::{TileError, TileResult};

/// Polyline segments shorter than this are dropped.
pub const DEGENERATE_SEGMENT_TOLERANCE: f64 = 1.0e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Lines,
    Triangles,
}

impl DrawMode {
    pub fn gl(&self) -> u32 {
        match self {
            DrawMode::Lines => 1,
            DrawMode::Triangles => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    Position,
    Normal,
    TexCoord0,
    BatchId,
    Direction,
    VertexDelta,
}

impl Semantic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Semantic::Position => "POSITION",
            Semantic::Normal => "NORMAL",
            Semantic::TexCoord0 => "TEXCOORD_0",
            Semantic::BatchId => "BATCHID",
            Semantic::Direction => "_DIRECTION",
            Semantic::VertexDelta => "_VERTEXDELTA",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Primitive {
    pub mode: DrawMode,
    pub indices: AccessorId,
    pub attributes: Vec<(Semantic, AccessorId)>,
    pub material: MaterialId,
}

/// Scene-wide tables a primitive is written into.
#[derive(Debug, Default)]
pub struct SceneParts {
    pub buffers: SceneBuffers,
    pub techniques: TechniqueCache,
    pub materials: MaterialTable,
    pub textures: TextureCache,
}

/// Quad expansion of a mesh's polylines: four vertices and two triangles per segment.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PolylineQuads {
    pub points: Vec<Point3<f64>>,
    pub directions: Vec<Vector3<f64>>,
    /// (side, parameter along segment)
    pub deltas: Vec<Vector2<f64>>,
    /// Source vertex of each expanded vertex.
    pub sources: Vec<u32>,
    pub indices: Vec<u32>,
}

impl PolylineQuads {
    pub fn segment_count(&self) -> usize {
        self.points.len() / 4
    }
}

pub fn expand_polylines(points: &[Point3<f64>], polylines: &[Vec<u32>]) -> PolylineQuads {
    let mut q = PolylineQuads::default();
    for line in polylines {
        for pair in line.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (pa, pb) = (points[a as usize], points[b as usize]);
            let dir = pb - pa;
            if dir.magnitude() < DEGENERATE_SEGMENT_TOLERANCE {
                continue;
            }
            let base = q.points.len() as u32;
            for (src, p, side, param) in [
                (a, pa, -1.0, 0.0),
                (a, pa, 1.0, 0.0),
                (b, pb, -1.0, 1.0),
                (b, pb, 1.0, 1.0),
            ] {
                q.points.push(p);
                q.directions.push(dir);
                q.deltas.push(Vector2::new(side, param));
                q.sources.push(src);
            }
            q.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
        }
    }
    q
}

fn flatten3(points: &[Point3<f64>]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y, p.z]).collect()
}

fn position_attribute(buffers: &mut SceneBuffers, points: &[Point3<f64>]) -> TileResult<AccessorId> {
    let range = Range3::from_points(points);
    let min = vec![range.min.x, range.min.y, range.min.z];
    let max = vec![range.max.x, range.max.y, range.max.z];
    let id = encode_attribute(
        buffers,
        &flatten3(points),
        3,
        &Encoding::StandardQuantization {
            min: min.clone(),
            max: max.clone(),
        },
    )?;
    let acc = buffers.accessor_mut(id);
    acc.min = Some(min);
    acc.max = Some(max);
    Ok(id)
}

fn uv_range(uvs: &[Vector2<f64>]) -> (Vec<f64>, Vec<f64>) {
    let mut min = vec![f64::MAX, f64::MAX];
    let mut max = vec![f64::MIN, f64::MIN];
    for uv in uvs {
        min[0] = min[0].min(uv.x);
        min[1] = min[1].min(uv.y);
        max[0] = max[0].max(uv.x);
        max[1] = max[1].max(uv.y);
    }
    (min, max)
}

/// True when a valid mesh yields a primitive: it has triangles, or a polyline segment
/// at least `DEGENERATE_SEGMENT_TOLERANCE` long.
pub fn is_drawable(mesh: &TileMesh) -> bool {
    if mesh.is_empty() {
        return false;
    }
    if !mesh.is_polyline() {
        return true;
    }
    mesh.polylines.iter().any(|line| {
        line.windows(2).any(|pair| {
            match (mesh.points.get(pair[0] as usize), mesh.points.get(pair[1] as usize)) {
                (Some(a), Some(b)) => (*b - *a).magnitude() >= DEGENERATE_SEGMENT_TOLERANCE,
                // out of range; left for validation to reject
                _ => true,
            }
        })
    })
}

/// Batch ids for each source vertex, or `None` when the mesh is not batched.
fn vertex_batch_ids(
    mesh: &TileMesh,
    batch: Option<&mut BatchIdMap>,
) -> TileResult<Option<Vec<u32>>> {
    let (Some(map), Some(ids)) = (batch, mesh.entity_ids.as_ref()) else {
        return Ok(None);
    };
    if !mesh.has_vertex_entity_ids() || ids.iter().all(|&id| id == INVALID_ENTITY_ID) {
        return Ok(None);
    }
    let out: Vec<u32> = ids.iter().map(|&id| map.get_batch_id(id)).collect();
    if map.len() > u16::MAX as usize + 1 {
        return Err(TileError::SceneDataError(format!(
            "{} batch ids exceed the 16-bit range",
            map.len()
        )));
    }
    Ok(Some(out))
}

/// Writes one mesh as a primitive. Returns `None` for a mesh with nothing to draw.
pub fn build_primitive(
    parts: &mut SceneParts,
    mesh: &TileMesh,
    batch: Option<&mut BatchIdMap>,
    tolerance: f64,
    settings: &TextureSettings,
) -> TileResult<Option<Primitive>> {
    mesh.validate()?;
    if !is_drawable(mesh) {
        log::debug!("mesh has nothing to draw");
        return Ok(None);
    }
    let batch_ids = vertex_batch_ids(mesh, batch)?;

    let primitive = if mesh.is_polyline() {
        build_polyline(parts, mesh, batch_ids)?
    } else {
        build_triangles(parts, mesh, batch_ids, tolerance, settings)?
    };
    Ok(Some(primitive))
}

fn build_triangles(
    parts: &mut SceneParts,
    mesh: &TileMesh,
    batch_ids: Option<Vec<u32>>,
    tolerance: f64,
    settings: &TextureSettings,
) -> TileResult<Primitive> {
    let display = &mesh.display;
    let key = technique_key(
        display,
        PrimitiveShape::Mesh,
        mesh.normals.is_some(),
        mesh.uvs.is_some(),
        batch_ids.is_some(),
    );

    let texture = match (&display.texture, &mesh.uvs) {
        (Some(image), Some(uvs)) if key.textured => {
            let (lo, hi) = uv_range(uvs);
            let uv_diag = ((hi[0] - lo[0]).powi(2) + (hi[1] - lo[1]).powi(2)).sqrt();
            let required = required_texture_size(
                mesh.point_range().diagonal(),
                uv_diag,
                tolerance,
                settings.max_size,
            );
            Some(parts.textures.add(&mut parts.buffers, image, required, settings)?)
        }
        _ => None,
    };

    let indices: Vec<u32> = mesh.triangles.iter().flat_map(|t| t.iter().copied()).collect();
    let index_acc = encode_indices(&mut parts.buffers, &indices)?;

    let mut attributes = vec![(
        Semantic::Position,
        position_attribute(&mut parts.buffers, &mesh.points)?,
    )];

    if key.lit() {
        if let Some(normals) = &mesh.normals {
            let flat: Vec<f64> = normals.iter().flat_map(|n| [n.x, n.y, n.z]).collect();
            let acc = encode_attribute(&mut parts.buffers, &flat, 3, &Encoding::OctEncodedNormal)?;
            attributes.push((Semantic::Normal, acc));
        }
    }

    if key.textured {
        if let Some(uvs) = &mesh.uvs {
            let (min, max) = uv_range(uvs);
            let flat: Vec<f64> = uvs.iter().flat_map(|uv| [uv.x, uv.y]).collect();
            let acc = encode_attribute(
                &mut parts.buffers,
                &flat,
                2,
                &Encoding::StandardQuantization { min, max },
            )?;
            attributes.push((Semantic::TexCoord0, acc));
        }
    }

    if let Some(ids) = &batch_ids {
        attributes.push((Semantic::BatchId, encode_batch_ids(&mut parts.buffers, ids)?));
    }

    let technique = parts.techniques.get_or_insert(key);
    let material = parts.materials.get_or_insert(display, technique, texture);

    Ok(Primitive {
        mode: DrawMode::Triangles,
        indices: index_acc,
        attributes,
        material,
    })
}

fn build_polyline(
    parts: &mut SceneParts,
    mesh: &TileMesh,
    batch_ids: Option<Vec<u32>>,
) -> TileResult<Primitive> {
    let quads = expand_polylines(&mesh.points, &mesh.polylines);

    let key = technique_key(
        &mesh.display,
        PrimitiveShape::Polyline,
        false,
        false,
        batch_ids.is_some(),
    );

    let index_acc = encode_indices(&mut parts.buffers, &quads.indices)?;
    let mut attributes = vec![(
        Semantic::Position,
        position_attribute(&mut parts.buffers, &quads.points)?,
    )];

    let dirs: Vec<f64> = quads.directions.iter().flat_map(|d| [d.x, d.y, d.z]).collect();
    attributes.push((
        Semantic::Direction,
        encode_attribute(&mut parts.buffers, &dirs, 3, &Encoding::RawFloat)?,
    ));
    let deltas: Vec<f64> = quads.deltas.iter().flat_map(|d| [d.x, d.y]).collect();
    attributes.push((
        Semantic::VertexDelta,
        encode_attribute(&mut parts.buffers, &deltas, 2, &Encoding::RawFloat)?,
    ));

    if let Some(ids) = &batch_ids {
        let expanded: Vec<u32> = quads.sources.iter().map(|&s| ids[s as usize]).collect();
        attributes.push((
            Semantic::BatchId,
            encode_batch_ids(&mut parts.buffers, &expanded)?,
        ));
    }

    let technique = parts.techniques.get_or_insert(key);
    let material = parts.materials.get_or_insert(&mesh.display, technique, None);

    Ok(Primitive {
        mode: DrawMode::Triangles,
        indices: index_acc,
        attributes,
        material,
    })
}
