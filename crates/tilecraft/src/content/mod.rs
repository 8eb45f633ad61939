pub mod types;
pub use types::*;

pub mod volumes;
pub use volumes::*;

pub mod tileset;
pub use tileset::*;

pub mod publisher;
pub use publisher::*;
