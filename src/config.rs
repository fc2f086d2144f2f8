use std::{fs, io, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read the configuration")]
    Io(#[from] io::Error),
    #[error("malformed configuration")]
    Parse(#[from] ron::error::SpannedError),
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize)]
pub struct Engine {
    /// Enable the validation layer and debug object names.
    #[serde(default)]
    pub validation: bool,
    #[serde(default)]
    pub acceleration: strata_render::BuildConfig,
}

impl Engine {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}
