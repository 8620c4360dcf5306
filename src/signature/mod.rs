//! Signature catalog
//!
//! Loads YAML signatures from files or directories. Each file is parsed
//! once per run and shared behind an `Arc`. Passive rule sets load from
//! their own directory.

mod parser;
mod passive;
mod target;

pub use parser::{
    MatchPolicy, OriginTemplate, RequestTemplate, Signature, SignatureInfo, SignatureType,
    VariableSource,
};
pub use passive::{Passive, PassiveRule};
pub use target::{more_variables, parse_target, Target};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SignatureError;

/// Loads and caches signatures by path
#[derive(Default)]
pub struct Catalog {
    cache: RwLock<HashMap<PathBuf, Arc<Signature>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single signature file
    pub fn load(&self, path: &Path) -> Result<Arc<Signature>, SignatureError> {
        if let Some(sign) = self.cache.read().get(path) {
            return Ok(sign.clone());
        }

        let content = std::fs::read_to_string(path).map_err(|e| SignatureError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut sign = Signature::from_yaml(&content, &path.display().to_string())?;
        sign.source = Some(path.to_path_buf());

        let sign = Arc::new(sign);
        self.cache.write().insert(path.to_path_buf(), sign.clone());
        Ok(sign)
    }

    /// Load every signature reachable from the given files and directories
    ///
    /// A missing path is fatal. Files that fail to parse are skipped with a
    /// warning. Selecting nothing at all is an error.
    pub fn load_all(&self, paths: &[PathBuf]) -> Result<Vec<Arc<Signature>>, SignatureError> {
        let mut files = Vec::new();
        for path in paths {
            if !path.exists() {
                return Err(SignatureError::DirectoryNotFound(path.display().to_string()));
            }
            if path.is_dir() {
                collect_recursive(path, &mut files)?;
            } else {
                files.push(path.clone());
            }
        }
        files.sort();
        files.dedup();

        let mut signatures = Vec::new();
        for file in files {
            match self.load(&file) {
                Ok(sign) => signatures.push(sign),
                Err(e) => tracing::warn!("Failed to load signature {}: {}", file.display(), e),
            }
        }

        if signatures.is_empty() {
            return Err(SignatureError::NoneSelected);
        }
        tracing::info!(count = signatures.len(), "Loaded signatures");
        Ok(signatures)
    }

    /// Built-in passive rules followed by every rule set under `dir`
    ///
    /// A missing directory leaves only the built-in rules. Broken files are
    /// skipped with a warning.
    pub fn load_passives(&self, dir: Option<&Path>) -> Vec<Passive> {
        let mut passives = vec![Passive::defaults()];
        let Some(dir) = dir.filter(|d| d.is_dir()) else {
            return passives;
        };

        let mut files = Vec::new();
        if let Err(e) = collect_recursive(dir, &mut files) {
            tracing::warn!("Failed to list passive rules: {}", e);
            return passives;
        }
        files.sort();

        for file in files {
            let loaded = std::fs::read_to_string(&file)
                .map_err(|e| SignatureError::ReadError {
                    path: file.display().to_string(),
                    source: e,
                })
                .and_then(|content| Passive::from_yaml(&content, &file.display().to_string()));
            match loaded {
                Ok(passive) => passives.push(passive),
                Err(e) => tracing::warn!("Failed to load passive rules {}: {}", file.display(), e),
            }
        }
        tracing::debug!(count = passives.len(), "Loaded passive rule sets");
        passives
    }

    /// Number of cached signatures
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

fn collect_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), SignatureError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SignatureError::ReadError {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            files.push(path);
        }
    }
    Ok(())
}
