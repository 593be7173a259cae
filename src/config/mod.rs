//! The `config` module loads client settings.
//!
//! Sources, lowest priority first: built-in defaults, an optional config
//! file, a `.env` file, then `STOMPMUX_*` environment variables with `__`
//! between nesting levels (`STOMPMUX_TRANSPORT__HOSTNAME=broker`).

mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ConnectionSettings, LoggingSettings, Settings, TransportSettings};

pub const ENV_PREFIX: &str = "STOMPMUX";

/// Loads the configuration from `config/default` and the environment,
/// merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();
    load(File::with_name("config/default").required(false))
}

/// Like [`load_config`], reading an explicit file instead of
/// `config/default`. The file must exist.
pub fn load_config_from(path: &Path) -> Result<Settings, ConfigError> {
    load(File::from(path).required(true))
}

fn load<S>(file: S) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
