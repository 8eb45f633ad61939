use crate::settings::PublisherConfig;
use crate::helpers::TileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

impl From<LoadConfigError> for TileError {
    fn from(e: LoadConfigError) -> Self {
        TileError::Config(e.to_string())
    }
}

pub const CONFIG_FILE: &str = "tilecraft";
pub const CONFIG_LOCAL_FILE: &str = "tilecraft.local";
pub const ENV_PREFIX: &str = "TILECRAFT";

pub fn load_config() -> Result<PublisherConfig, LoadConfigError> {
    let _ = dotenvy::dotenv();

    let builder = config::Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(config::File::with_name(CONFIG_LOCAL_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

    let cfg = builder.build()?;
    log::debug!("Config sources merged {:?}", cfg);

    let cfg: PublisherConfig = cfg.try_deserialize()?;
    validate(&cfg)?;

    log::info!(
        "Publisher config: output_dir={} workers={} max_open_files={}",
        cfg.output_dir,
        cfg.worker_threads,
        cfg.max_open_files
    );

    Ok(cfg)
}

pub fn validate(cfg: &PublisherConfig) -> Result<(), LoadConfigError> {
    if cfg.tileset_name.is_empty() {
        return Err(LoadConfigError::Invalid("tileset_name is empty".into()));
    }
    if cfg.texture_quality == 0 || cfg.texture_quality > 100 {
        return Err(LoadConfigError::Invalid(format!(
            "texture_quality {} not in 1..=100",
            cfg.texture_quality
        )));
    }
    if cfg.min_texture_size == 0 || cfg.min_texture_size > cfg.max_texture_size {
        return Err(LoadConfigError::Invalid(format!(
            "texture size bounds {}..{} are inverted",
            cfg.min_texture_size, cfg.max_texture_size
        )));
    }
    if cfg.max_open_files == 0 || cfg.worker_threads == 0 {
        return Err(LoadConfigError::Invalid(
            "worker_threads and max_open_files must be positive".into(),
        ));
    }
    Ok(())
}
