pub mod codec;
pub mod content;
pub mod helpers;
pub mod settings;

#[cfg(test)]
mod tests;

pub use codec::{
    read_tile, write_tile, BatchIdMap, BatchTableResolver, ContainerKind, ElementIdResolver,
    ReadMesh, TextureSettings, TileReader, TileWriteContext, WrittenTile,
};
pub use content::{
    ColorDef, EntityId, InstancedPart, PartInstance, PublishReport, Range3, TextureImage,
    TileDisplayParams, TileGeometry, TileGeometrySource, TileMesh, TileNode, TilePublisher,
    TilesetDocument, TilesetTreeBuilder,
};
pub use helpers::{init_logging, TileError, TileResult};
pub use settings::{load_config, PublisherConfig};
