#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use cgmath::Point3;
    use serde_json::{json, Value};

    use crate::codec::{read_tile, write_tile, TileWriteContext};
    use crate::content::{ColorDef, Range3, TileDisplayParams, TileGeometry, TileMesh, TileNode};
    use crate::helpers::TileError;
    use crate::tests::{b3dm_scene_json, edit_b3dm_scene, u32_at};

    /// Batched triangle, so the tile carries a batch table.
    fn batched_tile() -> Vec<u8> {
        let mut mesh = TileMesh::new(Arc::new(TileDisplayParams::from_color(ColorDef::rgb(
            20, 40, 60,
        ))));
        mesh.points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 1.0),
        ];
        mesh.triangles = vec![[0, 1, 2]];
        mesh.entity_ids = Some(vec![0xa, 0xa, 0xb]);

        let mut sink = Cursor::new(Vec::new());
        write_tile(
            &mut sink,
            &TileNode::new(Range3::null(), 0.1),
            &TileGeometry::from_meshes(vec![mesh]),
            &TileWriteContext::default(),
        )
        .unwrap();
        sink.into_inner()
    }

    fn position_accessor(doc: &Value) -> String {
        doc["meshes"]["Mesh"]["primitives"][0]["attributes"]["POSITION"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn rewritten_tile_still_reads() {
        let tile = batched_tile();
        let same = edit_b3dm_scene(&tile, |_| {});
        let meshes = read_tile(same).unwrap();
        assert_eq!(meshes[0].mesh.entity_ids, Some(vec![0xa, 0xa, 0xb]));
    }

    #[test]
    fn huge_view_offset_is_read_error() {
        let tile = edit_b3dm_scene(&batched_tile(), |doc| {
            for view in doc["bufferViews"].as_object_mut().unwrap().values_mut() {
                view["byteOffset"] = json!(u64::MAX);
            }
        });
        assert!(matches!(read_tile(tile), Err(TileError::ReadError(_))));
    }

    #[test]
    fn view_past_binary_body_is_read_error() {
        let tile = edit_b3dm_scene(&batched_tile(), |doc| {
            for view in doc["bufferViews"].as_object_mut().unwrap().values_mut() {
                view["byteLength"] = json!(1u64 << 40);
            }
        });
        assert!(matches!(read_tile(tile), Err(TileError::ReadError(_))));
    }

    #[test]
    fn accessor_past_its_view_is_read_error() {
        let tile = batched_tile();
        let pos = position_accessor(&b3dm_scene_json(&tile));

        let overrun = edit_b3dm_scene(&tile, |doc| doc["accessors"][&pos]["count"] = json!(1000));
        assert!(matches!(read_tile(overrun), Err(TileError::ReadError(_))));

        let wrapped = edit_b3dm_scene(&tile, |doc| {
            doc["accessors"][&pos]["count"] = json!(u64::MAX / 2);
            doc["accessors"][&pos]["byteOffset"] = json!(u64::MAX);
        });
        assert!(matches!(read_tile(wrapped), Err(TileError::ReadError(_))));
    }

    #[test]
    fn unknown_component_and_accessor_types_are_scene_data_errors() {
        let tile = batched_tile();
        let pos = position_accessor(&b3dm_scene_json(&tile));

        let component = edit_b3dm_scene(&tile, |doc| {
            doc["accessors"][&pos]["componentType"] = json!(5124)
        });
        assert!(matches!(read_tile(component), Err(TileError::SceneDataError(_))));

        let kind = edit_b3dm_scene(&tile, |doc| doc["accessors"][&pos]["type"] = json!("MAT4"));
        assert!(matches!(read_tile(kind), Err(TileError::SceneDataError(_))));
    }

    #[test]
    fn missing_members_are_scene_data_errors() {
        let tile = batched_tile();

        let no_meshes = edit_b3dm_scene(&tile, |doc| {
            doc.as_object_mut().unwrap().remove("meshes");
        });
        assert!(matches!(read_tile(no_meshes), Err(TileError::SceneDataError(_))));

        let no_material = edit_b3dm_scene(&tile, |doc| {
            doc["materials"] = json!({});
        });
        assert!(matches!(read_tile(no_material), Err(TileError::SceneDataError(_))));
    }

    #[test]
    fn corrupt_batch_table_is_batch_table_error() {
        let mut tile = batched_tile();
        assert_eq!(tile[24], b'{');
        tile[24] = b'[';
        assert!(matches!(
            read_tile(tile),
            Err(TileError::BatchTableParseError(_))
        ));
    }

    #[test]
    fn wrong_scene_magic_and_format_are_invalid_header() {
        let tile = batched_tile();
        let scene_at = 24 + u32_at(&tile, 12) as usize;

        let mut magic = tile.clone();
        magic[scene_at..scene_at + 4].copy_from_slice(b"glTf");
        assert!(matches!(read_tile(magic), Err(TileError::InvalidHeader(_))));

        let mut format = tile.clone();
        format[scene_at + 16] = 1;
        assert!(matches!(read_tile(format), Err(TileError::InvalidHeader(_))));
    }
}
