mod containers;
mod malformed;
mod publish;

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use serde_json::Value;

use crate::codec::{write_b3dm, write_glb};

pub(crate) fn u32_at(bytes: &[u8], at: usize) -> u32 {
    Cursor::new(&bytes[at..])
        .read_u32::<LittleEndian>()
        .expect("short buffer")
}

/// Byte range of the embedded scene inside a b3dm.
fn b3dm_glb(b3dm: &[u8]) -> &[u8] {
    let batch_json = u32_at(b3dm, 12) as usize;
    let batch_bin = u32_at(b3dm, 16) as usize;
    &b3dm[24 + batch_json + batch_bin..u32_at(b3dm, 8) as usize]
}

/// Scene document embedded in a b3dm.
pub(crate) fn b3dm_scene_json(b3dm: &[u8]) -> Value {
    let glb = b3dm_glb(b3dm);
    let json_len = u32_at(glb, 12) as usize;
    serde_json::from_slice(&glb[20..20 + json_len]).expect("scene json")
}

/// Rewrites the scene document of a b3dm, keeping its batch table and binary body.
pub(crate) fn edit_b3dm_scene(b3dm: &[u8], edit: impl FnOnce(&mut Value)) -> Vec<u8> {
    let glb = b3dm_glb(b3dm);
    let json_len = u32_at(glb, 12) as usize;
    let total = u32_at(glb, 8) as usize;

    let mut doc = b3dm_scene_json(b3dm);
    edit(&mut doc);
    let json = serde_json::to_vec(&doc).expect("scene json");
    let mut scene = Vec::new();
    write_glb(&json, &glb[20 + json_len..total], &mut scene).expect("scene");

    let batch_json = u32_at(b3dm, 12) as usize;
    let mut out = Cursor::new(Vec::new());
    write_b3dm(&mut out, &scene, &b3dm[24..24 + batch_json], u32_at(b3dm, 20)).expect("b3dm");
    out.into_inner()
}
