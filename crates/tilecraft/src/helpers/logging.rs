use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "TILECRAFT_LOG";

/// Installs a fmt subscriber filtered by `TILECRAFT_LOG` (default `info`).
/// Returns false when a global subscriber was already set.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

/// Span around the work on one tile file.
#[macro_export]
macro_rules! tile_span {
    ($name:expr, $suffix:expr) => {
        tracing::debug_span!("tile", name = %$name, suffix = %$suffix)
    };
}
