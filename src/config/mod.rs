mod settings;

use std::path::Path;

use config::{Config, Environment, File};

use crate::utils::ConfigError;

pub use settings::{
    LoggingSettings, PartialLoggingSettings, PartialPipelineSettings, PartialSettings,
    PipelineSettings, Settings,
};

/// Prefix of environment overrides, e.g. `RESILIENT_MQ_KAFKA__TOPIC`.
pub const ENV_PREFIX: &str = "RESILIENT_MQ";

/// Loads `config/default.*` (if present) and environment overrides, then
/// fills the gaps from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load(File::with_name("config/default").required(false))
}

/// Like `load_config`, reading the given file instead. The file must exist.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    load(File::from(path.as_ref()))
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
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge())
}

#[cfg(test)]
mod tests;
