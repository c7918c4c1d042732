//! Shared types used across coverfleet crates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ConfigError, ConfigResult};

/// Identifier of a worker slot. Consecutive from the fleet's start index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A candidate fuzzer configuration, identified by its file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigId(PathBuf);

impl ConfigId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name for display, falling back to the full path.
    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.display().to_string())
    }

    fn stem(&self) -> String {
        self.0
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Resource weight of a configuration, classified from its name.
///
/// `heavy` → 2.0, `medium` → 1.5, anything else → 1.0. Matching is
/// case-insensitive on the file stem. Always ≥ 1.0.
pub fn weight_of(config: &ConfigId) -> f64 {
    let stem = config.stem().to_lowercase();
    if stem.contains("heavy") {
        2.0
    } else if stem.contains("medium") {
        1.5
    } else {
        1.0
    }
}

/// The candidate configurations for a run. Read-only once built.
#[derive(Debug, Clone)]
pub struct ConfigPool {
    configs: Arc<[ConfigId]>,
}

impl ConfigPool {
    /// Build a pool; an empty list is rejected.
    pub fn new(configs: Vec<ConfigId>) -> ConfigResult<Self> {
        if configs.is_empty() {
            return Err(ConfigError::Invalid(
                "config pool must contain at least one configuration".to_string(),
            ));
        }
        Ok(Self {
            configs: configs.into(),
        })
    }

    pub fn from_paths<I, P>(paths: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(paths.into_iter().map(ConfigId::new).collect())
    }

    pub fn as_slice(&self) -> &[ConfigId] {
        &self.configs
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Every configuration other than `current`.
    pub fn alternatives(&self, current: Option<&ConfigId>) -> Vec<&ConfigId> {
        self.configs
            .iter()
            .filter(|c| Some(*c) != current)
            .collect()
    }
}

/// The two shared-memory regions a slot is bound to for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPair {
    /// Edge-coverage region, the one the monitor reads.
    pub edge: PathBuf,
    /// Bitmap-coverage region, written by the worker only.
    pub bitmap: PathBuf,
}

impl RegionPair {
    /// Deterministic region names: `<dir>/<project>_edge_<id>` and
    /// `<dir>/<project>_bitmap_<id>`.
    pub fn for_slot(dir: &Path, project: &str, slot: SlotId) -> Self {
        Self {
            edge: dir.join(format!("{project}_edge_{slot}")),
            bitmap: dir.join(format!("{project}_bitmap_{slot}")),
        }
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.edge, &self.bitmap]
    }
}
