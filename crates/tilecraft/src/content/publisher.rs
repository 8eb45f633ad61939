use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::bounded;
use log::{error, info, warn};
use rayon::prelude::*;

use crate::codec::{
    container_kind, write_tile, BatchTableResolver, ElementIdResolver, TextureSettings,
    TileWriteContext,
};
use crate::content::{Range3, TileGeometry, TileNode, TilesetTreeBuilder};
use crate::helpers::{matrix_from_row_major, TileError, TileResult};
use crate::settings::PublisherConfig;

/// Supplies the geometry of a node on demand.
pub trait TileGeometrySource: Send + Sync {
    fn geometry(&self, node: &TileNode) -> TileResult<TileGeometry>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub tiles_written: usize,
    pub tiles_without_geometry: usize,
    pub bytes_written: u64,
    pub tileset_path: PathBuf,
}

struct PublishedContent {
    range: Range3,
    url: String,
    bytes: u64,
}

/// Writes every content node of a tree and the tileset document that references them.
pub struct TilePublisher<'a> {
    config: PublisherConfig,
    source: &'a dyn TileGeometrySource,
    resolver: Box<dyn BatchTableResolver + 'a>,
    cancel: Arc<AtomicBool>,
}

impl<'a> TilePublisher<'a> {
    pub fn new(config: PublisherConfig, source: &'a dyn TileGeometrySource) -> Self {
        TilePublisher {
            config,
            source,
            resolver: Box::new(ElementIdResolver),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn BatchTableResolver + 'a>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Setting the flag stops the run before the next tile starts.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn publish(&self, root: &mut TileNode) -> TileResult<PublishReport> {
        let _span = tracing::info_span!("publish", tileset = %self.config.tileset_name).entered();
        let base = PathBuf::from(&self.config.output_dir);
        fs::create_dir_all(&base).map_err(|e| {
            error!("Failed to create {}: {}", base.display(), e);
            TileError::CantWriteToBaseDirectory(format!("{}: {}", base.display(), e))
        })?;

        assign_subdirectories(root, None, "", self.config.max_tiles_per_directory);

        let mut jobs = Vec::new();
        collect_content_nodes(root, String::new(), &mut jobs);
        info!("Publishing {} content tiles to {}", jobs.len(), base.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads.max(1))
            .thread_name(|i| format!("tilecraft-{}", i))
            .build()
            .map_err(|e| TileError::Config(e.to_string()))?;

        let (token_tx, token_rx) = bounded::<()>(self.config.max_open_files.max(1));
        for _ in 0..self.config.max_open_files.max(1) {
            let _ = token_tx.send(());
        }

        let ctx = TileWriteContext {
            texture: TextureSettings::from(&self.config),
            resolver: self.resolver.as_ref(),
            cancel: Some(self.cancel.as_ref()),
        };

        let results: Vec<(String, TileResult<PublishedContent>)> = pool.install(|| {
            jobs.par_iter()
                .map(|(suffix, node)| {
                    let res = self.publish_node(&base, suffix, node, &ctx, &token_rx, &token_tx);
                    (suffix.clone(), res)
                })
                .collect()
        });
        drop(jobs);

        let mut report = PublishReport::default();
        let mut published = HashMap::new();
        let mut failure = None;
        for (suffix, res) in results {
            match res {
                Ok(content) => {
                    report.tiles_written += 1;
                    report.bytes_written += content.bytes;
                    published.insert(suffix, content);
                }
                Err(e) if e.is_benign() => report.tiles_without_geometry += 1,
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        if self.cancel.load(Ordering::Relaxed) {
            warn!("Publish of {} cancelled", self.config.tileset_name);
            return Err(TileError::Aborted);
        }
        if let Some(e) = failure {
            error!("Publish of {} failed: {}", self.config.tileset_name, e);
            return Err(e);
        }

        attach_published(root, String::new(), &mut published);

        let mut builder = TilesetTreeBuilder::new();
        if let Some(rows) = &self.config.root_transform {
            builder = builder.with_root_transform(matrix_from_row_major(rows));
        }
        let doc = builder.build(root);
        let tileset_path = base.join(format!("{}.json", self.config.tileset_name));
        fs::write(&tileset_path, doc.to_json_bytes()?).map_err(|e| {
            TileError::UnableToOpenFile(format!("{}: {}", tileset_path.display(), e))
        })?;

        info!(
            "Published {} tiles ({} bytes), {} without geometry",
            report.tiles_written, report.bytes_written, report.tiles_without_geometry
        );
        report.tileset_path = tileset_path;
        Ok(report)
    }

    fn publish_node(
        &self,
        base: &Path,
        suffix: &str,
        node: &TileNode,
        ctx: &TileWriteContext<'_>,
        tokens: &crossbeam_channel::Receiver<()>,
        returns: &crossbeam_channel::Sender<()>,
    ) -> TileResult<PublishedContent> {
        let _span = crate::tile_span!(self.config.tileset_name, suffix).entered();
        if self.cancel.load(Ordering::Relaxed) {
            return Err(TileError::Aborted);
        }
        let geometry = self.source.geometry(node)?;
        if geometry.is_empty() {
            return Err(TileError::NoGeometry);
        }

        let file_name = format!(
            "{}{}.{}",
            self.config.tileset_name,
            suffix,
            container_kind(&geometry).extension()
        );
        let url = match &node.subdirectory {
            Some(dir) => format!("{}/{}", dir, file_name),
            None => file_name,
        };
        let path = base.join(&url);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TileError::CantWriteToBaseDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }

        // one token per open file
        tokens
            .recv()
            .map_err(|e| TileError::UnableToOpenFile(e.to_string()))?;
        let written = write_file(&path, node, &geometry, ctx);
        let _ = returns.send(());

        match written {
            Ok((range, bytes)) => Ok(PublishedContent { range, url, bytes }),
            Err(e) => {
                if !e.is_benign() {
                    error!("Tile {} failed: {}", path.display(), e);
                }
                if let Err(rm) = fs::remove_file(&path) {
                    warn!("Could not remove partial tile {}: {}", path.display(), rm);
                }
                Err(e)
            }
        }
    }
}

fn write_file(
    path: &Path,
    node: &TileNode,
    geometry: &TileGeometry,
    ctx: &TileWriteContext<'_>,
) -> TileResult<(Range3, u64)> {
    let file = File::create(path)
        .map_err(|e| TileError::UnableToOpenFile(format!("{}: {}", path.display(), e)))?;
    let mut sink = BufWriter::new(file);
    let tile = write_tile(&mut sink, node, geometry, ctx)?;
    sink.flush()?;
    Ok((tile.content_range, tile.byte_length))
}

/// Gives each child of an oversized subtree its own directory.
fn assign_subdirectories(node: &mut TileNode, dir: Option<String>, suffix: &str, max_tiles: usize) {
    let split = max_tiles > 0 && node.count_nodes() > max_tiles;
    node.subdirectory = dir.clone();
    for child in node.children.iter_mut() {
        let child_suffix = TileNode::child_suffix(suffix, child.sibling_index);
        let child_dir = if split {
            Some(match &dir {
                Some(d) => format!("{}/{}", d, child_suffix),
                None => child_suffix.clone(),
            })
        } else {
            dir.clone()
        };
        assign_subdirectories(child, child_dir, &child_suffix, max_tiles);
    }
}

fn collect_content_nodes<'n>(node: &'n TileNode, suffix: String, out: &mut Vec<(String, &'n TileNode)>) {
    for child in &node.children {
        collect_content_nodes(child, TileNode::child_suffix(&suffix, child.sibling_index), out);
    }
    if !node.is_empty {
        out.push((suffix, node));
    }
}

fn attach_published(node: &mut TileNode, suffix: String, published: &mut HashMap<String, PublishedContent>) {
    for child in node.children.iter_mut() {
        let child_suffix = TileNode::child_suffix(&suffix, child.sibling_index);
        attach_published(child, child_suffix, published);
    }
    match published.remove(&suffix) {
        Some(content) => {
            node.published_range = Some(content.range);
            node.content_url = Some(content.url);
        }
        None => {
            node.published_range = None;
            node.content_url = None;
        }
    }
}
