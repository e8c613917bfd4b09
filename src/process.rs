use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use serde::Serialize;
use tracing::info;

use crate::error::PrepError;
use crate::template::display_command;

/// Outcome of one external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed { code: Option<i32> },
}

impl RunStatus {
    pub fn describe(&self) -> String {
        match self {
            RunStatus::Success => "exit status 0".to_string(),
            RunStatus::Failed { code: Some(code) } => format!("exit status {code}"),
            RunStatus::Failed { code: None } => "terminated by signal".to_string(),
        }
    }
}

impl From<ExitStatus> for RunStatus {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            RunStatus::Success
        } else {
            RunStatus::Failed {
                code: status.code(),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub program: String,
    pub path: Option<String>,
    pub version: Option<String>,
}

pub trait CommandRunner: Send + Sync {
    /// Runs `argv` to completion with inherited stdio.
    fn run(&self, argv: &[String]) -> Result<RunStatus, PrepError>;

    fn tool_info(&self, program: &str) -> ToolInfo;
}

#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<RunStatus, PrepError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PrepError::Configuration("empty command line".to_string()))?;
        let resolved = find_in_path(program).unwrap_or_else(|| PathBuf::from(program));
        info!(command = %display_command(argv), "running");
        let status = Command::new(&resolved).args(args).status().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PrepError::MissingTool(program.clone())
            } else {
                PrepError::Filesystem(format!("spawn {program}: {err}"))
            }
        })?;
        Ok(status.into())
    }

    fn tool_info(&self, program: &str) -> ToolInfo {
        let path = find_in_path(program);
        let version = path
            .as_deref()
            .and_then(|path| tool_version(path, &["--version"]));
        ToolInfo {
            program: program.to_string(),
            path: path.map(|path| path.to_string_lossy().to_string()),
            version,
        }
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}
