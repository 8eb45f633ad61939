pub mod buffer;
pub use buffer::*;

pub mod accessor;
pub use accessor::*;

pub mod encoder;
pub use encoder::*;

pub mod batch;
pub use batch::*;

pub mod shaders;
pub use shaders::*;

pub mod texture;
pub use texture::*;

pub mod material;
pub use material::*;

pub mod primitive;
pub use primitive::*;

pub mod scene;
pub use scene::*;

pub mod container;
pub use container::*;

pub mod tile_writer;
pub use tile_writer::*;

pub mod reader;
pub use reader::*;
