#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use cgmath::{Point3, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::codec::{
        container_kind, geometry_range, write_tile, ContainerKind, TileWriteContext,
    };
    use crate::content::{
        ColorDef, InstancedPart, PartInstance, Range3, TileDisplayParams, TileGeometry, TileMesh,
        TileNode,
    };
    use crate::tests::u32_at;

    fn box_mesh(size: f64, entity: u64) -> TileMesh {
        let mut mesh = TileMesh::new(Arc::new(TileDisplayParams::from_color(ColorDef::rgb(
            0, 128, 0,
        ))));
        mesh.points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(size, 0.0, 0.0),
            Point3::new(size, size, 0.0),
            Point3::new(0.0, size, size),
        ];
        mesh.triangles = vec![[0, 1, 2], [0, 2, 3]];
        if entity != 0 {
            mesh.entity_ids = Some(vec![entity; 4]);
        }
        mesh
    }

    fn random_instances(rng: &mut StdRng, n: usize) -> Vec<PartInstance> {
        (0..n)
            .map(|i| PartInstance {
                position: Point3::new(
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(0.0..10.0),
                ),
                orientation: if i % 2 == 0 {
                    Some((Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0)))
                } else {
                    None
                },
                entity_id: rng.gen_range(1..20),
            })
            .collect()
    }

    fn write(geometry: &TileGeometry) -> (crate::codec::WrittenTile, Vec<u8>) {
        let node = TileNode::new(Range3::null(), 0.05);
        let mut sink = Cursor::new(Vec::new());
        let tile = write_tile(&mut sink, &node, geometry, &TileWriteContext::default())
            .expect("write_tile");
        (tile, sink.into_inner())
    }

    /// Offsets and magics of the sub-tiles of a composite.
    fn sub_tiles(bytes: &[u8]) -> Vec<(usize, [u8; 4])> {
        let count = u32_at(bytes, 12) as usize;
        let mut at = 16;
        let mut out = Vec::new();
        for _ in 0..count {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&bytes[at..at + 4]);
            out.push((at, magic));
            at += u32_at(bytes, at + 8) as usize;
        }
        assert_eq!(at, bytes.len(), "sub-tile lengths cover the composite");
        out
    }

    #[test]
    fn meshes_and_parts_make_a_composite() {
        let mut rng = StdRng::seed_from_u64(42);
        let geometry = TileGeometry {
            meshes: vec![box_mesh(3.0, 0x10), box_mesh(1.0, 0x11)],
            parts: vec![
                InstancedPart {
                    meshes: vec![box_mesh(0.5, 0)],
                    instances: random_instances(&mut rng, 25),
                },
                InstancedPart {
                    meshes: vec![box_mesh(2.0, 0)],
                    instances: random_instances(&mut rng, 3),
                },
            ],
        };

        let (tile, bytes) = write(&geometry);
        assert_eq!(tile.kind, ContainerKind::Cmpt);
        assert_eq!(&bytes[0..4], b"cmpt");
        assert_eq!(u32_at(&bytes, 8) as usize, bytes.len());
        assert_eq!(tile.byte_length as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);

        let subs = sub_tiles(&bytes);
        let magics: Vec<&[u8; 4]> = subs.iter().map(|(_, m)| m).collect();
        assert_eq!(magics, vec![b"b3dm", b"i3dm", b"i3dm"]);

        let (b3dm_at, _) = subs[0];
        assert_eq!(u32_at(&bytes, b3dm_at + 20), 3, "two entities plus invalid");

        for &(at, _) in &subs[1..] {
            let ft_json = u32_at(&bytes, at + 12) as usize;
            let ft_bin = u32_at(&bytes, at + 16) as usize;
            let bt_json = u32_at(&bytes, at + 20) as usize;
            let glb_at = at + 32 + ft_json + ft_bin + bt_json;
            assert_eq!((glb_at - at) % 8, 0);
            assert_eq!(&bytes[glb_at..glb_at + 4], b"glTF");
        }

        let first_i3dm = subs[1].0;
        let ft_json = u32_at(&bytes, first_i3dm + 12) as usize;
        let table: serde_json::Value =
            serde_json::from_slice(&bytes[first_i3dm + 32..first_i3dm + 32 + ft_json]).unwrap();
        assert_eq!(table["INSTANCES_LENGTH"], 25);

        assert_eq!(tile.content_range, geometry_range(&geometry));
        let meshes_only = Range3::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 3.0, 3.0));
        assert!(tile.content_range.diagonal() > meshes_only.diagonal());
    }

    #[test]
    fn parts_alone_skip_the_batched_model() {
        let mut rng = StdRng::seed_from_u64(42);
        let geometry = TileGeometry {
            meshes: vec![TileMesh::new(Arc::new(TileDisplayParams::default()))],
            parts: vec![InstancedPart {
                meshes: vec![box_mesh(1.0, 0)],
                instances: random_instances(&mut rng, 4),
            }],
        };
        let (tile, bytes) = write(&geometry);
        assert_eq!(tile.kind, ContainerKind::Cmpt);
        let subs = sub_tiles(&bytes);
        assert_eq!(subs.len(), 1);
        assert_eq!(&subs[0].1, b"i3dm");
    }

    /// A polyline whose only segment has zero length: non-empty, yet it draws nothing.
    fn collapsed_line() -> TileMesh {
        let mut mesh = TileMesh::new(Arc::new(TileDisplayParams::default()));
        mesh.points = vec![Point3::new(4.0, 4.0, 4.0); 2];
        mesh.polylines = vec![vec![0, 1]];
        mesh
    }

    #[test]
    fn undrawable_part_falls_back_to_b3dm() {
        let mut rng = StdRng::seed_from_u64(42);
        let geometry = TileGeometry {
            meshes: vec![box_mesh(1.0, 0x21)],
            parts: vec![InstancedPart {
                meshes: vec![collapsed_line()],
                instances: random_instances(&mut rng, 5),
            }],
        };
        assert!(!geometry.parts[0].is_empty());
        assert_eq!(container_kind(&geometry), ContainerKind::B3dm);

        let (tile, bytes) = write(&geometry);
        assert_eq!(tile.kind, ContainerKind::B3dm);
        assert_eq!(&bytes[0..4], tile.kind.magic());
        assert_eq!(tile.content_range, geometry_range(&geometry));
        assert_eq!(
            tile.content_range,
            Range3::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
        );
    }

    #[test]
    fn predicted_kind_matches_written_kind() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let part = |rng: &mut StdRng| {
                let meshes = if rng.gen_bool(0.5) {
                    vec![box_mesh(0.5, 0)]
                } else {
                    vec![collapsed_line()]
                };
                let count = rng.gen_range(0..3);
                InstancedPart {
                    meshes,
                    instances: random_instances(rng, count),
                }
            };
            let geometry = TileGeometry {
                meshes: if rng.gen_bool(0.5) {
                    vec![box_mesh(2.0, 0x30)]
                } else {
                    vec![collapsed_line()]
                },
                parts: vec![part(&mut rng), part(&mut rng)],
            };

            let node = TileNode::new(Range3::null(), 0.05);
            let mut sink = Cursor::new(Vec::new());
            match write_tile(&mut sink, &node, &geometry, &TileWriteContext::default()) {
                Ok(tile) => {
                    assert_eq!(tile.kind, container_kind(&geometry));
                    assert_eq!(&sink.get_ref()[0..4], tile.kind.magic());
                    assert_eq!(tile.content_range, geometry_range(&geometry));
                }
                Err(e) => {
                    assert!(e.is_benign(), "{}", e);
                    assert!(geometry_range(&geometry).is_null());
                }
            }
        }
    }

    #[test]
    fn parts_without_instances_fall_back_to_b3dm() {
        let geometry = TileGeometry {
            meshes: vec![box_mesh(1.0, 0)],
            parts: vec![InstancedPart {
                meshes: vec![box_mesh(1.0, 0)],
                instances: Vec::new(),
            }],
        };
        let (tile, bytes) = write(&geometry);
        assert_eq!(tile.kind, ContainerKind::B3dm);
        assert_eq!(&bytes[0..4], b"b3dm");
        assert_eq!(tile.content_range, Range3::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
        ));
    }
}
