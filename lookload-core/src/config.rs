//! Loader configuration and feature flags.
//!
//! Configuration can be built in code, read from TOML, or taken from the
//! environment:
//!
//! - `LOOKLOAD_MAX_BATCH_SIZE` - records per storage call (default 500)
//! - `LOOKLOAD_FLAGS` - comma separated `name=bool` pairs
//!
//! ```rust
//! use lookload_core::{LoaderConfig, ASSOCIATION_LOADER_FLAG};
//!
//! let config = LoaderConfig::from_toml_str(r#"
//!     max_batch_size = 100
//!
//!     [flags]
//!     association_loader = false
//! "#).unwrap();
//!
//! assert_eq!(config.max_batch_size, 100);
//! assert!(!config.flags.enabled(ASSOCIATION_LOADER_FLAG));
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{LoadError, LoadResult};

/// Flag routing association fields through the batched loader.
pub const ASSOCIATION_LOADER_FLAG: &str = "association_loader";

/// Default number of records per storage call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Named boolean feature toggles.
///
/// Unknown flags read as disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(BTreeMap<SmolStr, bool>);

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::empty().set(ASSOCIATION_LOADER_FLAG, true)
    }
}

impl FeatureFlags {
    /// Flags with nothing enabled.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Set a flag.
    pub fn set(mut self, name: impl Into<SmolStr>, enabled: bool) -> Self {
        self.0.insert(name.into(), enabled);
        self
    }

    /// Check if a flag is enabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Parse `name=bool,name=bool`; a bare `name` means enabled.
    pub fn parse(spec: &str) -> LoadResult<Self> {
        let mut flags = Self::empty();
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = match item.split_once('=') {
                Some((name, value)) => (name.trim(), value.trim()),
                None => (item, "true"),
            };
            let enabled = match value.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                other => {
                    return Err(LoadError::config(format!(
                        "flag `{}` has invalid value `{}`",
                        name, other
                    )));
                }
            };
            flags = flags.set(name, enabled);
        }
        Ok(flags)
    }

    /// Flags in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Configuration for a [`Loader`](crate::Loader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Maximum number of records handed to one storage call.
    pub max_batch_size: usize,
    /// Feature flags, layered over the defaults.
    #[serde(deserialize_with = "flags_over_defaults")]
    pub flags: FeatureFlags,
}

fn flags_over_defaults<'de, D>(deserializer: D) -> Result<FeatureFlags, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides = BTreeMap::<SmolStr, bool>::deserialize(deserializer)?;
    Ok(overrides
        .into_iter()
        .fold(FeatureFlags::default(), |flags, (name, enabled)| flags.set(name, enabled)))
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flags: FeatureFlags::default(),
        }
    }
}

impl LoaderConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set a feature flag.
    pub fn flag(mut self, name: impl Into<SmolStr>, enabled: bool) -> Self {
        self.flags = self.flags.set(name, enabled);
        self
    }

    /// Parse TOML configuration.
    pub fn from_toml_str(text: &str) -> LoadResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| LoadError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read TOML configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Build configuration from defaults overridden by the environment.
    pub fn from_env() -> LoadResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from defaults overridden by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoadResult<Self> {
        let mut config = Self::default();

        if let Some(size) = lookup("LOOKLOAD_MAX_BATCH_SIZE") {
            config.max_batch_size = size.trim().parse().map_err(|_| {
                LoadError::config(format!("LOOKLOAD_MAX_BATCH_SIZE is not a number: `{}`", size))
            })?;
        }

        if let Some(spec) = lookup("LOOKLOAD_FLAGS") {
            for (name, enabled) in FeatureFlags::parse(&spec)?.iter() {
                config.flags = config.flags.set(name, enabled);
            }
        }

        config.validate()?;
        debug!(max_batch_size = config.max_batch_size, "loader configuration resolved");
        Ok(config)
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> LoadResult<()> {
        if self.max_batch_size == 0 {
            return Err(LoadError::config("max_batch_size must be at least 1"));
        }
        Ok(())
    }
}
