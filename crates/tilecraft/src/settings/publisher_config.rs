use serde::{Deserialize, Serialize};

/// Settings for one publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub output_dir: String,
    pub tileset_name: String,
    /// JPEG quality used when re-encoding opaque textures.
    pub texture_quality: u8,
    pub max_texture_size: u32,
    pub min_texture_size: u32,
    /// A subtree with more nodes than this gets its own subdirectory.
    pub max_tiles_per_directory: usize,
    pub worker_threads: usize,
    pub max_open_files: usize,
    /// Row-major 4x4 applied at the tileset root.
    pub root_transform: Option<[f64; 16]>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            output_dir: "./tiles".to_string(),
            tileset_name: "tileset".to_string(),
            texture_quality: 50,
            max_texture_size: 1024,
            min_texture_size: 64,
            max_tiles_per_directory: 5000,
            worker_threads: num_cpus::get().max(1),
            max_open_files: 64,
            root_transform: None,
        }
    }
}
