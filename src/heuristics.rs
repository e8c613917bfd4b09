use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::error::PrepError;

const HEURISTIC_SUFFIX: &str = "_heuristic.py";

#[derive(Debug, Clone, Serialize)]
pub struct HeuristicEntry {
    pub name: String,
    pub path: Utf8PathBuf,
}

/// Named heudiconv heuristic files found on a search path.
#[derive(Debug, Clone, Default)]
pub struct HeuristicCatalog {
    entries: BTreeMap<String, Utf8PathBuf>,
}

impl HeuristicCatalog {
    pub fn discover(search_paths: &[Utf8PathBuf]) -> Result<Self, PrepError> {
        let mut entries = BTreeMap::new();
        for dir in search_paths {
            if !dir.as_std_path().is_dir() {
                debug!(dir = %dir, "heuristic directory missing, skipping");
                continue;
            }
            let listing = fs::read_dir(dir.as_std_path())
                .map_err(|err| PrepError::Filesystem(format!("read {dir}: {err}")))?;
            for entry in listing.flatten() {
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                    continue;
                };
                let Some(name) = heuristic_name(&path) else {
                    continue;
                };
                // first directory on the search path wins
                entries.entry(name).or_insert(path);
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> Vec<HeuristicEntry> {
        self.entries
            .iter()
            .map(|(name, path)| HeuristicEntry {
                name: name.clone(),
                path: path.clone(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Utf8Path> {
        self.entries.get(name).map(|path| path.as_path())
    }

    /// An existing file path wins over a catalog name. Values that look like
    /// paths are returned unchanged so the caller reports the missing file.
    pub fn resolve(&self, name_or_path: &str) -> Result<Utf8PathBuf, PrepError> {
        let as_path = Utf8Path::new(name_or_path);
        if as_path.as_std_path().is_file() {
            return Ok(as_path.to_path_buf());
        }
        if let Some(path) = self.get(name_or_path) {
            return Ok(path.to_path_buf());
        }
        let looks_like_path = name_or_path.contains(std::path::MAIN_SEPARATOR)
            || name_or_path.contains('/')
            || name_or_path.ends_with(".py");
        if looks_like_path {
            return Ok(as_path.to_path_buf());
        }
        Err(PrepError::Configuration(format!(
            "heuristic not found: {name_or_path} (pass a heuristic file or run `bidsprep heuristics`)"
        )))
    }
}

fn heuristic_name(path: &Utf8Path) -> Option<String> {
    let file_name = path.file_name()?;
    let name = file_name.strip_suffix(HEURISTIC_SUFFIX)?;
    (!name.is_empty() && path.as_std_path().is_file()).then(|| name.to_string())
}
