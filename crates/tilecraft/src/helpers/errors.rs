use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Read failed: {0}")]
    ReadError(String),

    #[error("Scene JSON parse failed: {0}")]
    SceneParseError(String),

    #[error("Batch table JSON parse failed: {0}")]
    BatchTableParseError(String),

    #[error("Scene data error: {0}")]
    SceneDataError(String),

    #[error("Unable to open file: {0}")]
    UnableToOpenFile(String),

    #[error("Can't write to base directory: {0}")]
    CantWriteToBaseDirectory(String),

    #[error("Tile has no geometry")]
    NoGeometry,

    #[error("Tile aborted")]
    Aborted,

    #[error("Container written out of order: {0}")]
    ContainerState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TileError {
    /// `NoGeometry` means "omit this tile"; it is an outcome, not a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, TileError::NoGeometry)
    }
}

pub type TileResult<T> = Result<T, TileError>;

pub trait ReadContext<T> {
    fn read_error(self, msg: &str) -> Result<T, TileError>;
    fn scene_data(self, msg: &str) -> Result<T, TileError>;
    fn scene_parse(self, msg: &str) -> Result<T, TileError>;
    fn batch_table_parse(self, msg: &str) -> Result<T, TileError>;
}

impl<T, E> ReadContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn read_error(self, msg: &str) -> Result<T, TileError> {
        self.map_err(|e| TileError::ReadError(format!("{}: {}", msg, e)))
    }

    fn scene_data(self, msg: &str) -> Result<T, TileError> {
        self.map_err(|e| TileError::SceneDataError(format!("{}: {}", msg, e)))
    }

    fn scene_parse(self, msg: &str) -> Result<T, TileError> {
        self.map_err(|e| TileError::SceneParseError(format!("{}: {}", msg, e)))
    }

    fn batch_table_parse(self, msg: &str) -> Result<T, TileError> {
        self.map_err(|e| TileError::BatchTableParseError(format!("{}: {}", msg, e)))
    }
}

/// Same conversions for lookups that produce `Option`.
pub trait MissingContext<T> {
    fn or_scene_data(self, msg: &str) -> Result<T, TileError>;
}

impl<T> MissingContext<T> for Option<T> {
    fn or_scene_data(self, msg: &str) -> Result<T, TileError> {
        self.ok_or_else(|| TileError::SceneDataError(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_maps_to_specific_kind() {
        let r: Result<(), &str> = Err("boom");
        match r.read_error("short read") {
            Err(TileError::ReadError(m)) => assert_eq!(m, "short read: boom"),
            other => panic!("unexpected {other:?}"),
        }

        let missing: Option<u32> = None;
        assert!(matches!(
            missing.or_scene_data("no accessors"),
            Err(TileError::SceneDataError(_))
        ));
        assert!(TileError::NoGeometry.is_benign());
        assert!(!TileError::Aborted.is_benign());
    }
}
