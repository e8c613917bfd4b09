use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::convert::{
    ConversionJob, ConversionRequest, TemplateSource, convert_dicom_to_bids, plan_conversion,
};
use crate::error::PrepError;
use crate::fmriprep::{FmriprepConfig, FmriprepOptions, FMRIPREP_DOCKER, run_fmriprep};
use crate::heuristics::{HeuristicCatalog, HeuristicEntry};
use crate::intended_for::{ReconcileResult, update_intended_for};
use crate::layout::BidsLayout;
use crate::manifest::Manifest;
use crate::process::{CommandRunner, ToolInfo};
use crate::template::display_command;

#[derive(Debug, Clone)]
pub struct Dicom2BidsOptions {
    pub template: TemplateSource,
    /// Heuristic path or catalog name.
    pub heuristic: String,
    pub bids_dir: Utf8PathBuf,
    pub overwrite: bool,
    pub skip_intended_for: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dicom2BidsResult {
    pub dry_run: bool,
    pub rows: usize,
    pub conversions: Vec<ConversionJob>,
    pub intended_for: Option<ReconcileResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FmriprepResult {
    pub dry_run: bool,
    pub command: String,
    pub output_dir: String,
    pub work_dir: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeuristicsResult {
    pub heuristics: Vec<HeuristicEntry>,
    pub search_paths: Vec<String>,
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Convert,
    Reconcile,
    Preprocess,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<R: CommandRunner> {
    runner: R,
    catalog: HeuristicCatalog,
    search_paths: Vec<Utf8PathBuf>,
}

impl<R: CommandRunner> App<R> {
    pub fn new(runner: R, search_paths: Vec<Utf8PathBuf>) -> Result<Self, PrepError> {
        let catalog = HeuristicCatalog::discover(&search_paths)?;
        Ok(Self {
            runner,
            catalog,
            search_paths,
        })
    }

    pub fn catalog(&self) -> &HeuristicCatalog {
        &self.catalog
    }

    /// Converts every manifest row with heudiconv, then repairs fieldmap
    /// `IntendedFor` lists unless skipped.
    pub fn dicom2bids(
        &self,
        manifest: &Manifest,
        options: Dicom2BidsOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Dicom2BidsResult, PrepError> {
        let started_at = Utc::now();
        if options.dry_run {
            sink.event(ProgressEvent {
                message: "phase=Plan; dry run, nothing will be executed".to_string(),
                elapsed: None,
            });
            return Ok(Dicom2BidsResult {
                dry_run: true,
                rows: manifest.len(),
                conversions: self.preview_conversion(manifest, &options),
                intended_for: None,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let request = ConversionRequest {
            template: options.template,
            heuristic: self.catalog.resolve(&options.heuristic)?,
            bids_dir: options.bids_dir,
            overwrite: options.overwrite,
        };
        sink.event(ProgressEvent {
            message: format!("phase=Convert; {} manifest rows", manifest.len()),
            elapsed: None,
        });
        let conversions = convert_dicom_to_bids(&self.runner, manifest, &request, sink)?;

        let intended_for = if options.skip_intended_for {
            None
        } else {
            Some(self.intended_for(&request.bids_dir, manifest, sink)?)
        };

        Ok(Dicom2BidsResult {
            dry_run: false,
            rows: manifest.len(),
            conversions,
            intended_for,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub fn intended_for(
        &self,
        bids_dir: &Utf8Path,
        manifest: &Manifest,
        sink: &dyn ProgressSink,
    ) -> Result<ReconcileResult, PrepError> {
        sink.event(ProgressEvent {
            message: format!("phase=IntendedFor; indexing {bids_dir}"),
            elapsed: None,
        });
        let layout = BidsLayout::open(bids_dir)?;
        update_intended_for(&layout, manifest, sink)
    }

    /// Runs fMRIPrep; with `dry_run` the command is only assembled.
    pub fn fmriprep(
        &self,
        config: FmriprepConfig,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<FmriprepResult, PrepError> {
        let started_at = Utc::now();
        if dry_run {
            let preview = FmriprepOptions::resolve(config.clone())
                .map(|options| display_command(&options.command()))
                .unwrap_or_else(|_| format!("{FMRIPREP_DOCKER} ..."));
            sink.event(ProgressEvent {
                message: format!("phase=Plan; would run {preview}"),
                elapsed: None,
            });
            return Ok(FmriprepResult {
                dry_run: true,
                command: preview,
                output_dir: config
                    .output_dir
                    .map(|dir| dir.to_string())
                    .unwrap_or_default(),
                work_dir: config.work_dir.map(|dir| dir.to_string()),
                started_at,
                finished_at: Utc::now(),
            });
        }

        let options = FmriprepOptions::resolve(config)?;
        sink.event(ProgressEvent {
            message: format!("phase=Preprocess; running fMRIPrep on {}", options.bids_dir),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let run = run_fmriprep(&self.runner, &options)?;
        sink.event(ProgressEvent {
            message: "fMRIPrep completed".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(FmriprepResult {
            dry_run: false,
            command: run.command,
            output_dir: run.output_dir,
            work_dir: run.work_dir,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub fn heuristics(&self) -> HeuristicsResult {
        HeuristicsResult {
            heuristics: self.catalog.entries(),
            search_paths: self.search_paths.iter().map(ToString::to_string).collect(),
            tools: vec![
                self.runner.tool_info("heudiconv"),
                self.runner.tool_info(FMRIPREP_DOCKER),
            ],
        }
    }

    // Dry runs never fail on missing inputs; unrenderable rows are left out.
    fn preview_conversion(
        &self,
        manifest: &Manifest,
        options: &Dicom2BidsOptions,
    ) -> Vec<ConversionJob> {
        let Ok(template) = options.template.load() else {
            return Vec::new();
        };
        let heuristic = self
            .catalog
            .resolve(&options.heuristic)
            .unwrap_or_else(|_| Utf8PathBuf::from(&options.heuristic));
        manifest
            .rows()
            .iter()
            .filter_map(|row| {
                let single = Manifest::new(vec![row.clone()]);
                plan_conversion(
                    &single,
                    &template,
                    &heuristic,
                    &options.bids_dir,
                    options.overwrite,
                )
                .ok()
                .and_then(|mut jobs| jobs.pop())
            })
            .collect()
    }
}
