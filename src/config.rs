use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::fmriprep::FmriprepConfig;

pub const DEFAULT_CONFIG_FILE: &str = "bidsprep.json";
pub const HEURISTICS_ENV: &str = "BIDSPREP_HEURISTICS";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub heuristic_paths: Vec<String>,
    #[serde(default)]
    pub heudiconv_template: Option<String>,
    #[serde(default)]
    pub fmriprep: FmriprepConfig,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub heuristic_paths: Vec<Utf8PathBuf>,
    pub heudiconv_template: Option<Utf8PathBuf>,
    pub fmriprep: FmriprepConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `bidsprep.json` in the current directory when present.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PrepError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PrepError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PrepError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PrepError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let mut heuristic_paths: Vec<Utf8PathBuf> = config
            .heuristic_paths
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();
        heuristic_paths.extend(env_heuristic_paths());
        heuristic_paths.extend(default_heuristic_dir());

        Ok(ResolvedConfig {
            schema_version,
            heuristic_paths,
            heudiconv_template: config.heudiconv_template.map(Utf8PathBuf::from),
            fmriprep: config.fmriprep,
        })
    }
}

fn env_heuristic_paths() -> Vec<Utf8PathBuf> {
    let Some(value) = std::env::var_os(HEURISTICS_ENV) else {
        return Vec::new();
    };
    std::env::split_paths(&value)
        .filter(|path| !path.as_os_str().is_empty())
        .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
        .collect()
}

/// `<user data dir>/heuristics`, searched last.
pub fn default_heuristic_dir() -> Option<Utf8PathBuf> {
    ProjectDirs::from("org", "bidsprep", "bidsprep").and_then(|dirs| {
        Utf8PathBuf::from_path_buf(dirs.data_dir().join("heuristics")).ok()
    })
}
