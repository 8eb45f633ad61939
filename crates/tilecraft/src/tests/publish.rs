#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use cgmath::Point3;

    use crate::content::{
        ColorDef, InstancedPart, PartInstance, Range3, TileDisplayParams, TileGeometry,
        TileGeometrySource, TileMesh, TileNode, TilePublisher, TilesetDocument,
    };
    use crate::helpers::{TileError, TileResult};
    use crate::settings::PublisherConfig;

    /// Fills each node's range with one triangle, except nodes whose range starts past `empty_from`.
    struct TriangleSource {
        empty_from: f64,
    }

    impl TileGeometrySource for TriangleSource {
        fn geometry(&self, node: &TileNode) -> TileResult<TileGeometry> {
            if node.range.min.x >= self.empty_from {
                return Ok(TileGeometry::default());
            }
            let (lo, hi) = (node.range.min, node.range.max);
            let mut mesh = TileMesh::new(Arc::new(TileDisplayParams::from_color(ColorDef::rgb(
                200, 10, 10,
            ))));
            mesh.points = vec![lo, Point3::new(hi.x, lo.y, lo.z), hi];
            mesh.triangles = vec![[0, 1, 2]];
            mesh.entity_ids = Some(vec![7, 7, 8]);
            Ok(TileGeometry::from_meshes(vec![mesh]))
        }
    }

    fn cube(lo: f64, hi: f64) -> Range3 {
        Range3::new(Point3::new(lo, lo, lo), Point3::new(hi, hi, hi))
    }

    /// Empty root over three leaves: [0,10], [10,20] and [20,30].
    fn three_leaf_tree() -> TileNode {
        let mut root = TileNode::empty(cube(0.0, 30.0), 8.0);
        for i in 0..3 {
            let lo = i as f64 * 10.0;
            root.add_child(TileNode::new(cube(lo, lo + 10.0), 0.5));
        }
        root
    }

    fn output_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tilecraft-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn config(dir: &PathBuf) -> PublisherConfig {
        PublisherConfig {
            output_dir: dir.to_string_lossy().into_owned(),
            worker_threads: 2,
            max_open_files: 1,
            ..Default::default()
        }
    }

    fn read_tileset(path: &PathBuf) -> TilesetDocument {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn publishes_tiles_and_prunes_empty_leaves() {
        let dir = output_dir("prune");
        let source = TriangleSource { empty_from: 20.0 };
        let publisher = TilePublisher::new(config(&dir), &source);
        let mut root = three_leaf_tree();

        let report = publisher.publish(&mut root).unwrap();
        assert_eq!(report.tiles_written, 2);
        assert_eq!(report.tiles_without_geometry, 1);
        assert_eq!(report.tileset_path, dir.join("tileset.json"));

        let first = fs::read(dir.join("tileset00.b3dm")).unwrap();
        let second = fs::read(dir.join("tileset01.b3dm")).unwrap();
        assert_eq!(report.bytes_written as usize, first.len() + second.len());
        assert!(!dir.join("tileset02.b3dm").exists());
        assert_eq!(root.children[1].content_url.as_deref(), Some("tileset01.b3dm"));
        assert!(root.children[2].content_url.is_none());

        let meshes = crate::read_tile(first).unwrap();
        assert_eq!(
            meshes[0].element_ids.as_deref(),
            Some(&["0x7".to_string(), "0x7".to_string(), "0x8".to_string()][..])
        );

        let doc = read_tileset(&report.tileset_path);
        let children = doc.root.children.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].content.as_ref().unwrap().url, "tileset00.b3dm");
        let root_range = doc.root.bounding_volume.as_ref().unwrap().to_range();
        assert!((root_range.max.x - 20.0).abs() < 1e-9);
        assert!(doc.root.content.is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    /// Leaf 0 gets a part whose only mesh collapses to nothing, leaf 1 a drawable part.
    struct InstancedSource;

    impl TileGeometrySource for InstancedSource {
        fn geometry(&self, node: &TileNode) -> TileResult<TileGeometry> {
            let mut geometry = TriangleSource { empty_from: f64::MAX }.geometry(node)?;
            let mut part_mesh = TileMesh::new(Arc::new(TileDisplayParams::default()));
            if node.range.min.x < 10.0 {
                part_mesh.points = vec![node.range.center(); 2];
                part_mesh.polylines = vec![vec![0, 1]];
            } else {
                part_mesh.points = vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(0.5, 0.0, 0.0),
                    Point3::new(0.0, 0.5, 0.0),
                ];
                part_mesh.triangles = vec![[0, 1, 2]];
            }
            geometry.parts.push(InstancedPart {
                meshes: vec![part_mesh],
                instances: vec![PartInstance {
                    position: node.range.center(),
                    orientation: None,
                    entity_id: 0x40,
                }],
            });
            Ok(geometry)
        }
    }

    #[test]
    fn file_extensions_match_container_magic() {
        let dir = output_dir("extensions");
        let mut root = three_leaf_tree();
        let report = TilePublisher::new(config(&dir), &InstancedSource)
            .publish(&mut root)
            .unwrap();
        assert_eq!(report.tiles_written, 3);

        let doc = read_tileset(&report.tileset_path);
        let urls: Vec<String> = doc.root.children.unwrap()
            .iter()
            .map(|c| c.content.as_ref().unwrap().url.clone())
            .collect();
        assert_eq!(urls, vec!["tileset00.b3dm", "tileset01.cmpt", "tileset02.cmpt"]);
        for url in &urls {
            let bytes = fs::read(dir.join(url)).unwrap();
            let extension = url.rsplit('.').next().unwrap();
            assert_eq!(&bytes[0..4], extension.as_bytes(), "{}", url);
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn large_trees_are_split_into_directories() {
        let dir = output_dir("subdirs");
        let source = TriangleSource { empty_from: f64::MAX };
        let cfg = PublisherConfig {
            max_tiles_per_directory: 2,
            ..config(&dir)
        };
        let publisher = TilePublisher::new(cfg, &source);
        let mut root = three_leaf_tree();

        let report = publisher.publish(&mut root).unwrap();
        assert_eq!(report.tiles_written, 3);
        assert!(dir.join("02").join("tileset02.b3dm").exists());

        let doc = read_tileset(&report.tileset_path);
        let urls: Vec<String> = doc.root.children.unwrap()
            .iter()
            .map(|c| c.content.as_ref().unwrap().url.clone())
            .collect();
        assert_eq!(urls, vec!["00/tileset00.b3dm", "01/tileset01.b3dm", "02/tileset02.b3dm"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn root_transform_is_written() {
        let dir = output_dir("transform");
        let source = TriangleSource { empty_from: f64::MAX };
        let cfg = PublisherConfig {
            root_transform: Some([
                2.0, 0.0, 0.0, 5.0, //
                0.0, 2.0, 0.0, 6.0, //
                0.0, 0.0, 2.0, 7.0, //
                0.0, 0.0, 0.0, 1.0,
            ]),
            ..config(&dir)
        };
        let mut root = three_leaf_tree();
        let report = TilePublisher::new(cfg, &source).publish(&mut root).unwrap();

        let doc = read_tileset(&report.tileset_path);
        let t = doc.root.transform.unwrap();
        assert_eq!(t[0], 2.0);
        assert_eq!(&t[12..15], &[5.0, 6.0, 7.0]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cancelled_run_is_aborted() {
        let dir = output_dir("cancel");
        let source = TriangleSource { empty_from: f64::MAX };
        let publisher = TilePublisher::new(config(&dir), &source);
        publisher.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);

        let mut root = three_leaf_tree();
        assert!(matches!(publisher.publish(&mut root), Err(TileError::Aborted)));
        assert!(!dir.join("tileset.json").exists());
        assert!(!dir.join("tileset00.b3dm").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn source_errors_fail_the_run() {
        struct Failing;
        impl TileGeometrySource for Failing {
            fn geometry(&self, _node: &TileNode) -> TileResult<TileGeometry> {
                Err(TileError::SceneDataError("broken element".into()))
            }
        }

        let dir = output_dir("failing");
        let mut root = three_leaf_tree();
        let res = TilePublisher::new(config(&dir), &Failing).publish(&mut root);
        assert!(matches!(res, Err(TileError::SceneDataError(_))));
        assert!(!dir.join("tileset.json").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
