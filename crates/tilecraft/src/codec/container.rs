use std::io::{Cursor, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use cgmath::{Point3, Vector3};
use log::error;
use serde_json::json;

use crate::codec::{quantize, widened_range, BatchIdMap, BatchTableResolver};
use crate::content::{PartInstance, Range3, INVALID_ENTITY_ID};
use crate::helpers::{TileError, TileResult};

pub const CONTAINER_VERSION: u32 = 1;
pub const B3DM_HEADER_LENGTH: usize = 24;
pub const I3DM_HEADER_LENGTH: usize = 32;
pub const CMPT_HEADER_LENGTH: usize = 16;
/// i3dm `gltfFormat`: the scene is embedded rather than referenced by URL.
pub const I3DM_EMBEDDED_GLTF: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    B3dm,
    I3dm,
    Cmpt,
}

impl ContainerKind {
    pub fn magic(&self) -> &'static [u8; 4] {
        match self {
            ContainerKind::B3dm => b"b3dm",
            ContainerKind::I3dm => b"i3dm",
            ContainerKind::Cmpt => b"cmpt",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::B3dm => "b3dm",
            ContainerKind::I3dm => "i3dm",
            ContainerKind::Cmpt => "cmpt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Empty,
    HeaderWritten,
    BodyWritten(usize),
    LengthBackpatched,
    Closed,
}

#[inline]
pub fn padding_for(offset: u64, alignment: u64) -> u64 {
    (alignment - offset % alignment) % alignment
}

/// Pads `bytes` with `fill` so that `base + len` is a multiple of `alignment`.
pub fn pad_section(mut bytes: Vec<u8>, base: usize, alignment: usize, fill: u8) -> Vec<u8> {
    let pad = padding_for((base + bytes.len()) as u64, alignment as u64) as usize;
    bytes.extend(std::iter::repeat(fill).take(pad));
    bytes
}

/// Frames one container on a seekable sink, backpatching its length on completion.
#[derive(Debug)]
pub struct ContainerWriter {
    kind: ContainerKind,
    start: u64,
    length_pos: u64,
    state: ContainerState,
}

impl ContainerWriter {
    pub fn new(kind: ContainerKind) -> Self {
        ContainerWriter {
            kind,
            start: 0,
            length_pos: 0,
            state: ContainerState::Empty,
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    fn require(&self, ok: bool, op: &str) -> TileResult<()> {
        if ok {
            return Ok(());
        }
        error!(
            "{} container: {} not allowed in state {:?}",
            self.kind.extension(),
            op,
            self.state
        );
        Err(TileError::ContainerState(format!(
            "{} in state {:?}",
            op, self.state
        )))
    }

    fn in_body(&self) -> bool {
        matches!(
            self.state,
            ContainerState::HeaderWritten | ContainerState::BodyWritten(_)
        )
    }

    fn sections(&self) -> usize {
        match self.state {
            ContainerState::BodyWritten(k) => k,
            _ => 0,
        }
    }

    /// Magic, version, a length placeholder, then the format's own header fields.
    pub fn write_header<W: Write + Seek>(&mut self, sink: &mut W, fields: &[u32]) -> TileResult<()> {
        self.require(self.state == ContainerState::Empty, "write_header")?;
        self.start = sink.stream_position()?;
        sink.write_all(self.kind.magic())?;
        sink.write_u32::<LittleEndian>(CONTAINER_VERSION)?;
        self.length_pos = sink.stream_position()?;
        sink.write_u32::<LittleEndian>(0)?;
        for f in fields {
            sink.write_u32::<LittleEndian>(*f)?;
        }
        self.state = ContainerState::HeaderWritten;
        Ok(())
    }

    pub fn write_section<W: Write + Seek>(&mut self, sink: &mut W, bytes: &[u8]) -> TileResult<()> {
        self.require(self.in_body(), "write_section")?;
        sink.write_all(bytes)?;
        self.state = ContainerState::BodyWritten(self.sections() + 1);
        Ok(())
    }

    /// Writes a complete inner container as one section.
    pub fn write_nested<W, F>(&mut self, sink: &mut W, write: F) -> TileResult<u64>
    where
        W: Write + Seek,
        F: FnOnce(&mut W) -> TileResult<u64>,
    {
        self.require(self.in_body(), "write_nested")?;
        let len = write(sink)?;
        self.state = ContainerState::BodyWritten(self.sections() + 1);
        Ok(len)
    }

    /// Zero pads relative to the container start.
    pub fn pad<W: Write + Seek>(&mut self, sink: &mut W, alignment: u64) -> TileResult<()> {
        self.require(self.in_body(), "pad")?;
        let pos = sink.stream_position()? - self.start;
        let n = padding_for(pos, alignment) as usize;
        if n > 0 {
            sink.write_all(&vec![0u8; n])?;
        }
        Ok(())
    }

    /// Pads to 4 bytes and patches the total length. Returns that length.
    pub fn backpatch_length<W: Write + Seek>(&mut self, sink: &mut W) -> TileResult<u64> {
        self.require(
            matches!(self.state, ContainerState::BodyWritten(_)),
            "backpatch_length",
        )?;
        self.pad(sink, 4)?;
        let end = sink.stream_position()?;
        let len = end - self.start;
        let len32 = u32::try_from(len).map_err(|_| {
            TileError::ContainerState(format!("container length {} exceeds 32 bits", len))
        })?;
        sink.seek(SeekFrom::Start(self.length_pos))?;
        sink.write_u32::<LittleEndian>(len32)?;
        sink.seek(SeekFrom::Start(end))?;
        self.state = ContainerState::LengthBackpatched;
        Ok(len)
    }

    pub fn close(&mut self) -> TileResult<()> {
        self.require(self.state == ContainerState::LengthBackpatched, "close")?;
        self.state = ContainerState::Closed;
        Ok(())
    }
}

/// Runs `frame` against an in-memory seekable buffer and copies the result to `sink`.
pub fn write_framed<W, T, F>(sink: &mut W, frame: F) -> TileResult<T>
where
    W: Write,
    F: FnOnce(&mut Cursor<Vec<u8>>) -> TileResult<T>,
{
    let mut cursor = Cursor::new(Vec::new());
    let out = frame(&mut cursor)?;
    sink.write_all(cursor.get_ref())?;
    Ok(out)
}

/// Batched 3D model: batch table JSON followed by the scene.
pub fn write_b3dm<W: Write + Seek>(
    sink: &mut W,
    glb: &[u8],
    batch_json: &[u8],
    batch_count: u32,
) -> TileResult<u64> {
    let batch_json = if batch_json.is_empty() {
        Vec::new()
    } else {
        pad_section(batch_json.to_vec(), B3DM_HEADER_LENGTH, 4, b' ')
    };

    let mut w = ContainerWriter::new(ContainerKind::B3dm);
    w.write_header(sink, &[batch_json.len() as u32, 0, batch_count])?;
    w.write_section(sink, &batch_json)?;
    w.write_section(sink, glb)?;
    let len = w.backpatch_length(sink)?;
    w.close()?;
    Ok(len)
}

/// Feature table of an instanced part.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceFeatureTable {
    pub json: Vec<u8>,
    pub binary: Vec<u8>,
    pub batch_ids: Option<BatchIdMap>,
}

impl InstanceFeatureTable {
    pub fn build(instances: &[PartInstance]) -> TileResult<Self> {
        if instances.is_empty() {
            return Err(TileError::NoGeometry);
        }
        let range = Range3::from_points(instances.iter().map(|i| &i.position));
        let axes: Vec<(f64, f64)> = [
            (range.min.x, range.max.x),
            (range.min.y, range.max.y),
            (range.min.z, range.max.z),
        ]
        .iter()
        .map(|&(lo, hi)| widened_range(lo, hi))
        .collect();

        let mut binary = Vec::with_capacity(instances.len() * 32);
        for inst in instances {
            let p: Point3<f64> = inst.position;
            for (v, (lo, hi)) in [p.x, p.y, p.z].iter().zip(&axes) {
                binary.write_u16::<LittleEndian>(quantize(*v, *lo, *hi))?;
            }
        }

        let mut table = json!({
            "INSTANCES_LENGTH": instances.len(),
            "QUANTIZED_VOLUME_OFFSET": axes.iter().map(|a| a.0).collect::<Vec<_>>(),
            "QUANTIZED_VOLUME_SCALE": axes.iter().map(|a| a.1 - a.0).collect::<Vec<_>>(),
            "POSITION_QUANTIZED": { "byteOffset": 0 },
        });

        if instances.iter().any(|i| i.orientation.is_some()) {
            binary = pad_section(binary, 0, 4, 0);
            let up_offset = binary.len();
            for inst in instances {
                let (up, _) = instance_axes(inst);
                for v in [up.x, up.y, up.z] {
                    binary.write_f32::<LittleEndian>(v as f32)?;
                }
            }
            let right_offset = binary.len();
            for inst in instances {
                let (_, right) = instance_axes(inst);
                for v in [right.x, right.y, right.z] {
                    binary.write_f32::<LittleEndian>(v as f32)?;
                }
            }
            table["NORMAL_UP"] = json!({ "byteOffset": up_offset });
            table["NORMAL_RIGHT"] = json!({ "byteOffset": right_offset });
        }

        let mut batch_ids = None;
        if instances.iter().any(|i| i.entity_id != INVALID_ENTITY_ID) {
            let mut map = BatchIdMap::new();
            let ids: Vec<u32> = instances
                .iter()
                .map(|i| map.get_batch_id(i.entity_id))
                .collect();
            if map.len() > u16::MAX as usize + 1 {
                return Err(TileError::SceneDataError(
                    "instance batch ids exceed the 16-bit range".into(),
                ));
            }
            binary = pad_section(binary, 0, 2, 0);
            table["BATCH_ID"] = json!({
                "byteOffset": binary.len(),
                "componentType": "UNSIGNED_SHORT",
            });
            for id in ids {
                binary.write_u16::<LittleEndian>(id as u16)?;
            }
            batch_ids = Some(map);
        }

        let json = serde_json::to_vec(&table).map_err(|e| TileError::SceneDataError(e.to_string()))?;
        Ok(InstanceFeatureTable {
            json,
            binary,
            batch_ids,
        })
    }
}

/// (up, right) of an instance; unrotated instances use +Y up and +X right.
fn instance_axes(inst: &PartInstance) -> (Vector3<f64>, Vector3<f64>) {
    inst.orientation
        .unwrap_or((Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0)))
}

/// Instanced 3D model: per-instance feature table, batch table, then the shared part scene.
/// Each section starts on an 8-byte boundary relative to the container start.
pub fn write_i3dm<W: Write + Seek>(
    sink: &mut W,
    glb: &[u8],
    instances: &[PartInstance],
    resolver: &dyn BatchTableResolver,
) -> TileResult<u64> {
    let table = InstanceFeatureTable::build(instances)?;
    let batch_json = match &table.batch_ids {
        Some(map) => crate::codec::batch_table_bytes(map, resolver)?,
        None => Vec::new(),
    };

    let ft_json = pad_section(table.json, I3DM_HEADER_LENGTH, 8, b' ');
    let ft_bin = pad_section(table.binary, 0, 8, 0);
    let bt_json = if batch_json.is_empty() {
        batch_json
    } else {
        pad_section(batch_json, 0, 8, b' ')
    };

    let mut w = ContainerWriter::new(ContainerKind::I3dm);
    w.write_header(
        sink,
        &[
            ft_json.len() as u32,
            ft_bin.len() as u32,
            bt_json.len() as u32,
            0,
            I3DM_EMBEDDED_GLTF,
        ],
    )?;
    w.write_section(sink, &ft_json)?;
    w.write_section(sink, &ft_bin)?;
    w.write_section(sink, &bt_json)?;
    w.write_section(sink, glb)?;
    let len = w.backpatch_length(sink)?;
    w.close()?;
    Ok(len)
}

pub type SubTileWriter<'a, W> = Box<dyn FnOnce(&mut W) -> TileResult<u64> + 'a>;

/// Composite: each sub-tile is framed and backpatched before the next begins.
pub fn write_cmpt<W: Write + Seek>(sink: &mut W, tiles: Vec<SubTileWriter<'_, W>>) -> TileResult<u64> {
    let mut w = ContainerWriter::new(ContainerKind::Cmpt);
    w.write_header(sink, &[tiles.len() as u32])?;
    for tile in tiles {
        w.write_nested(sink, tile)?;
    }
    let len = w.backpatch_length(sink)?;
    w.close()?;
    Ok(len)
}
