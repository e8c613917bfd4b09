use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PrepError;
use crate::process::{CommandRunner, RunStatus};
use crate::template::display_command;

pub const FMRIPREP_DOCKER: &str = "fmriprep-docker";
pub const DEFAULT_DOCKER_IMAGE: &str = "nipreps/fmriprep:latest";
pub const DEFAULT_OUTPUT_SPACE: &str = "MNI152NLin2009cAsym:res-2";

/// fMRIPrep inputs as given by the user; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FmriprepConfig {
    pub bids_dir: Option<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub participant_label: Vec<String>,
    pub session_id: Vec<String>,
    pub task_id: Vec<String>,
    pub output_spaces: Vec<String>,
    pub skip_bids_validation: Option<bool>,
    pub fs_license_file: Option<Utf8PathBuf>,
    pub work_dir: Option<Utf8PathBuf>,
    pub n_cpus: Option<u32>,
    pub omp_nthreads: Option<u32>,
    pub mem_gb: Option<f64>,
    pub low_mem: Option<bool>,
    pub bids_filter_file: Option<Utf8PathBuf>,
    pub docker_image: Option<String>,
    pub verbose: Option<bool>,
}

impl FmriprepConfig {
    /// Fields set in `overrides` replace ours; lists replace when non-empty.
    pub fn merged_with(mut self, overrides: FmriprepConfig) -> Self {
        fn take_list(base: &mut Vec<String>, over: Vec<String>) {
            if !over.is_empty() {
                *base = over;
            }
        }
        self.bids_dir = overrides.bids_dir.or(self.bids_dir);
        self.output_dir = overrides.output_dir.or(self.output_dir);
        take_list(&mut self.participant_label, overrides.participant_label);
        take_list(&mut self.session_id, overrides.session_id);
        take_list(&mut self.task_id, overrides.task_id);
        take_list(&mut self.output_spaces, overrides.output_spaces);
        self.skip_bids_validation = overrides.skip_bids_validation.or(self.skip_bids_validation);
        self.fs_license_file = overrides.fs_license_file.or(self.fs_license_file);
        self.work_dir = overrides.work_dir.or(self.work_dir);
        self.n_cpus = overrides.n_cpus.or(self.n_cpus);
        self.omp_nthreads = overrides.omp_nthreads.or(self.omp_nthreads);
        self.mem_gb = overrides.mem_gb.or(self.mem_gb);
        self.low_mem = overrides.low_mem.or(self.low_mem);
        self.bids_filter_file = overrides.bids_filter_file.or(self.bids_filter_file);
        self.docker_image = overrides.docker_image.or(self.docker_image);
        self.verbose = overrides.verbose.or(self.verbose);
        self
    }
}

/// Validated fMRIPrep invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FmriprepOptions {
    pub bids_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub participant_label: Vec<String>,
    pub session_id: Vec<String>,
    pub task_id: Vec<String>,
    pub output_spaces: Vec<String>,
    pub skip_bids_validation: bool,
    pub fs_license_file: Option<Utf8PathBuf>,
    pub work_dir: Option<Utf8PathBuf>,
    pub n_cpus: Option<u32>,
    pub omp_nthreads: Option<u32>,
    pub mem_gb: Option<f64>,
    pub low_mem: bool,
    pub bids_filter_file: Option<Utf8PathBuf>,
    pub docker_image: String,
    pub verbose: bool,
}

impl FmriprepOptions {
    pub fn resolve(config: FmriprepConfig) -> Result<Self, PrepError> {
        let bids_dir = config
            .bids_dir
            .ok_or_else(|| PrepError::Configuration("bids_dir is required".to_string()))?;
        if !bids_dir.as_std_path().is_dir() {
            return Err(PrepError::Configuration(format!(
                "BIDS directory not found: {bids_dir}"
            )));
        }
        let output_dir = config
            .output_dir
            .ok_or_else(|| PrepError::Configuration("output_dir is required".to_string()))?;
        require_file("fs_license_file", config.fs_license_file.as_deref())?;
        require_file("bids_filter_file", config.bids_filter_file.as_deref())?;
        if config.n_cpus == Some(0) || config.omp_nthreads == Some(0) {
            return Err(PrepError::Configuration(
                "n_cpus and omp_nthreads must be positive".to_string(),
            ));
        }
        if let Some(mem_gb) = config.mem_gb {
            if !(mem_gb.is_finite() && mem_gb > 0.0) {
                return Err(PrepError::Configuration(format!(
                    "mem_gb must be positive, got {mem_gb}"
                )));
            }
        }

        let output_spaces = if config.output_spaces.is_empty() {
            vec![DEFAULT_OUTPUT_SPACE.to_string()]
        } else {
            config.output_spaces
        };

        Ok(Self {
            bids_dir,
            output_dir,
            participant_label: strip_prefixes(config.participant_label, "sub-"),
            session_id: strip_prefixes(config.session_id, "ses-"),
            task_id: strip_prefixes(config.task_id, "task-"),
            output_spaces,
            skip_bids_validation: config.skip_bids_validation.unwrap_or(false),
            fs_license_file: config.fs_license_file,
            work_dir: config.work_dir,
            n_cpus: config.n_cpus,
            omp_nthreads: config.omp_nthreads,
            mem_gb: config.mem_gb,
            low_mem: config.low_mem.unwrap_or(false),
            bids_filter_file: config.bids_filter_file,
            docker_image: config
                .docker_image
                .unwrap_or_else(|| DEFAULT_DOCKER_IMAGE.to_string()),
            verbose: config.verbose.unwrap_or(false),
        })
    }

    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            FMRIPREP_DOCKER.to_string(),
            self.bids_dir.to_string(),
            self.output_dir.to_string(),
            "participant".to_string(),
        ];
        for participant in &self.participant_label {
            cmd.extend(["--participant-label".to_string(), participant.clone()]);
        }
        for session in &self.session_id {
            cmd.extend(["--session-id".to_string(), session.clone()]);
        }
        for task in &self.task_id {
            cmd.extend(["--task-id".to_string(), task.clone()]);
        }
        if !self.output_spaces.is_empty() {
            cmd.push("--output-spaces".to_string());
            cmd.extend(self.output_spaces.iter().cloned());
        }
        if self.skip_bids_validation {
            cmd.push("--skip_bids_validation".to_string());
        }
        if let Some(license) = &self.fs_license_file {
            cmd.extend(["--fs-license-file".to_string(), license.to_string()]);
        }
        if let Some(work_dir) = &self.work_dir {
            cmd.extend(["--work-dir".to_string(), work_dir.to_string()]);
        }
        if let Some(n_cpus) = self.n_cpus {
            cmd.extend(["--n_cpus".to_string(), n_cpus.to_string()]);
        }
        if let Some(threads) = self.omp_nthreads {
            cmd.extend(["--omp-nthreads".to_string(), threads.to_string()]);
        }
        if let Some(mem_gb) = self.mem_gb {
            cmd.extend(["--mem_gb".to_string(), mem_gb.to_string()]);
        }
        if self.low_mem {
            cmd.push("--low-mem".to_string());
        }
        if let Some(filter) = &self.bids_filter_file {
            cmd.extend(["--bids-filter-file".to_string(), filter.to_string()]);
        }
        if self.docker_image != DEFAULT_DOCKER_IMAGE {
            cmd.extend(["--image".to_string(), self.docker_image.clone()]);
        }
        if self.verbose {
            cmd.push("--verbose".to_string());
        }
        cmd
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FmriprepRun {
    pub command: String,
    pub output_dir: String,
    pub work_dir: Option<String>,
}

/// Checks the wrapper is installed, creates output directories and runs it.
pub fn run_fmriprep<R: CommandRunner + ?Sized>(
    runner: &R,
    options: &FmriprepOptions,
) -> Result<FmriprepRun, PrepError> {
    let tool = runner.tool_info(FMRIPREP_DOCKER);
    if tool.path.is_none() {
        return Err(PrepError::MissingTool(format!(
            "{FMRIPREP_DOCKER} (install with `pip install fmriprep-docker`)"
        )));
    }
    info!(version = ?tool.version, "found {FMRIPREP_DOCKER}");

    create_dir(&options.output_dir)?;
    if let Some(work_dir) = &options.work_dir {
        create_dir(work_dir)?;
    }

    let argv = options.command();
    let command = display_command(&argv);
    let status = runner.run(&argv)?;
    if let RunStatus::Failed { .. } = status {
        return Err(PrepError::Preprocessing {
            command,
            status: status.describe(),
        });
    }
    Ok(FmriprepRun {
        command,
        output_dir: options.output_dir.to_string(),
        work_dir: options.work_dir.as_ref().map(ToString::to_string),
    })
}

fn create_dir(path: &Utf8Path) -> Result<(), PrepError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| PrepError::Filesystem(format!("create {path}: {err}")))
}

fn require_file(field: &str, path: Option<&Utf8Path>) -> Result<(), PrepError> {
    match path {
        Some(path) if !path.as_std_path().is_file() => Err(PrepError::Configuration(format!(
            "{field} not found: {path}"
        ))),
        _ => Ok(()),
    }
}

fn strip_prefixes(values: Vec<String>, prefix: &str) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.strip_prefix(prefix).map(str::to_string).unwrap_or(value))
        .collect()
}
