pub mod errors;
pub use errors::*;

pub mod hash;
pub use hash::*;

pub mod logging;
pub use logging::*;

pub mod matrix;
pub use matrix::*;
