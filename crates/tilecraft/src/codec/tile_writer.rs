use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use cgmath::Vector3;

use crate::codec::{
    batch_table_bytes, is_drawable, write_b3dm, write_cmpt, write_i3dm, BatchIdMap,
    BatchTableResolver, ContainerKind, ElementIdResolver, SceneAssembler, SubTileWriter,
    TextureSettings,
};
use crate::content::{InstancedPart, PartInstance, Range3, TileGeometry, TileNode};
use crate::helpers::{TileError, TileResult};

/// Per-call collaborators for `write_tile`.
pub struct TileWriteContext<'a> {
    pub texture: TextureSettings,
    pub resolver: &'a dyn BatchTableResolver,
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for TileWriteContext<'static> {
    fn default() -> Self {
        TileWriteContext {
            texture: TextureSettings::default(),
            resolver: &ElementIdResolver,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTile {
    pub kind: ContainerKind,
    pub byte_length: u64,
    /// Range of everything written, in tile coordinates.
    pub content_range: Range3,
}

/// A part is written only when it is placed at least once and one of its meshes draws.
fn part_is_drawable(part: &InstancedPart) -> bool {
    !part.instances.is_empty() && part.meshes.iter().any(is_drawable)
}

/// Container kind `write_tile` picks for this geometry.
pub fn container_kind(geometry: &TileGeometry) -> ContainerKind {
    if geometry.parts.iter().any(part_is_drawable) {
        ContainerKind::Cmpt
    } else {
        ContainerKind::B3dm
    }
}

fn instance_range(part_range: &Range3, inst: &PartInstance) -> Range3 {
    if part_range.is_null() {
        return Range3::null();
    }
    let (up, right) = inst
        .orientation
        .unwrap_or((Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0)));
    let forward = right.cross(up);
    let mut out = Range3::null();
    for i in 0..8 {
        let x = if i & 1 == 0 { part_range.min.x } else { part_range.max.x };
        let y = if i & 2 == 0 { part_range.min.y } else { part_range.max.y };
        let z = if i & 4 == 0 { part_range.min.z } else { part_range.max.z };
        let v = right * x + up * y + forward * z;
        out.extend(&(inst.position + v));
    }
    out
}

fn part_range(part: &InstancedPart) -> Range3 {
    let local = part
        .meshes
        .iter()
        .filter(|m| is_drawable(m))
        .fold(Range3::null(), |r, m| r.union(&m.point_range()));
    part.instances
        .iter()
        .fold(Range3::null(), |r, inst| r.union(&instance_range(&local, inst)))
}

fn part_glb(part: &InstancedPart, tolerance: f64, texture: TextureSettings) -> TileResult<Vec<u8>> {
    let mut scene = SceneAssembler::new(tolerance, texture);
    for mesh in &part.meshes {
        scene.add_mesh(mesh, None)?;
    }
    scene.into_glb()
}

/// Writes one node's geometry: b3dm when there are no instanced parts, otherwise a
/// composite of one b3dm for the batched meshes and one i3dm per part.
pub fn write_tile<W: Write + Seek>(
    sink: &mut W,
    node: &TileNode,
    geometry: &TileGeometry,
    ctx: &TileWriteContext<'_>,
) -> TileResult<WrittenTile> {
    let _span = tracing::debug_span!("write_tile", tolerance = node.tolerance).entered();

    if ctx.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
        return Err(TileError::Aborted);
    }
    if geometry.is_empty() {
        return Err(TileError::NoGeometry);
    }

    let mut batch = BatchIdMap::new();
    let mut scene = SceneAssembler::new(node.tolerance, ctx.texture);
    let mut content_range = Range3::null();
    for mesh in &geometry.meshes {
        if scene.add_mesh(mesh, Some(&mut batch))? {
            content_range = content_range.union(&mesh.point_range());
        }
    }

    let batched = if scene.is_empty() {
        None
    } else {
        let glb = scene.into_glb()?;
        let json = batch_table_bytes(&batch, ctx.resolver)?;
        let count = if batch.is_empty() { 0 } else { batch.len() as u32 };
        Some((glb, json, count))
    };

    let mut parts = Vec::new();
    for part in geometry.parts.iter().filter(|p| part_is_drawable(p)) {
        match part_glb(part, node.tolerance, ctx.texture) {
            Ok(glb) => {
                content_range = content_range.union(&part_range(part));
                parts.push((glb, part));
            }
            Err(e) if e.is_benign() => continue,
            Err(e) => return Err(e),
        }
    }

    if parts.is_empty() {
        let Some((glb, json, count)) = batched else {
            return Err(TileError::NoGeometry);
        };
        let byte_length = write_b3dm(sink, &glb, &json, count)?;
        return Ok(WrittenTile {
            kind: ContainerKind::B3dm,
            byte_length,
            content_range,
        });
    }

    let mut tiles: Vec<SubTileWriter<'_, W>> = Vec::new();
    if let Some((glb, json, count)) = &batched {
        tiles.push(Box::new(move |s: &mut W| write_b3dm(s, glb, json, *count)));
    }
    for (glb, part) in &parts {
        let resolver = ctx.resolver;
        tiles.push(Box::new(move |s: &mut W| {
            write_i3dm(s, glb, &part.instances, resolver)
        }));
    }
    let byte_length = write_cmpt(sink, tiles)?;
    log::debug!(
        "composite tile with {} sub-tiles, {} bytes",
        parts.len() + batched.is_some() as usize,
        byte_length
    );

    Ok(WrittenTile {
        kind: ContainerKind::Cmpt,
        byte_length,
        content_range,
    })
}

/// Content range without writing anything.
pub fn geometry_range(geometry: &TileGeometry) -> Range3 {
    let meshes = geometry
        .meshes
        .iter()
        .filter(|m| is_drawable(m))
        .fold(Range3::null(), |r, m| r.union(&m.point_range()));
    geometry
        .parts
        .iter()
        .filter(|p| part_is_drawable(p))
        .fold(meshes, |r, p| r.union(&part_range(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn rotated_instance_range() {
        let local = Range3::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        let inst = PartInstance {
            position: Point3::new(10.0, 0.0, 0.0),
            // right = +Y, up = +Z
            orientation: Some((Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0))),
            entity_id: 0,
        };
        let r = instance_range(&local, &inst);
        assert_eq!(r.max.y, 2.0);
        assert_eq!(r.max.z, 1.0);
        assert_eq!(r.min.x, 10.0);
        assert_eq!(r.max.x, 11.0);
    }

    #[test]
    fn empty_geometry_is_no_geometry() {
        let mut sink = std::io::Cursor::new(Vec::new());
        let node = TileNode::new(Range3::null(), 1.0);
        let res = write_tile(&mut sink, &node, &TileGeometry::default(), &TileWriteContext::default());
        assert!(matches!(res, Err(TileError::NoGeometry)));
        assert!(sink.get_ref().is_empty());
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = AtomicBool::new(true);
        let ctx = TileWriteContext {
            texture: TextureSettings::default(),
            resolver: &ElementIdResolver,
            cancel: Some(&cancel),
        };
        let mut sink = std::io::Cursor::new(Vec::new());
        let node = TileNode::new(Range3::null(), 1.0);
        let res = write_tile(&mut sink, &node, &TileGeometry::default(), &ctx);
        assert!(matches!(res, Err(TileError::Aborted)));
    }
}
