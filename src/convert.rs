use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::PrepError;
use crate::manifest::Manifest;
use crate::process::{CommandRunner, RunStatus};
use crate::template::{CommandTemplate, TemplateValues, display_command};

pub const OVERWRITE_FLAG: &str = "--overwrite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Builtin,
    File(Utf8PathBuf),
}

impl TemplateSource {
    pub fn load(&self) -> Result<CommandTemplate, PrepError> {
        match self {
            TemplateSource::Builtin => Ok(CommandTemplate::builtin()),
            TemplateSource::File(path) => CommandTemplate::from_file(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub template: TemplateSource,
    pub heuristic: Utf8PathBuf,
    pub bids_dir: Utf8PathBuf,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub subject: String,
    pub session: Option<String>,
    pub argv: Vec<String>,
    pub command: String,
}

/// Renders one heudiconv invocation per manifest row, in manifest order.
pub fn plan_conversion(
    manifest: &Manifest,
    template: &CommandTemplate,
    heuristic: &Utf8Path,
    bids_dir: &Utf8Path,
    overwrite: bool,
) -> Result<Vec<ConversionJob>, PrepError> {
    manifest
        .rows()
        .iter()
        .map(|row| {
            let values = TemplateValues {
                dicom_directory: row.dicom_path.as_str(),
                subject_id: row.subject.as_str(),
                session_id: row.session.as_ref().map(|session| session.as_str()),
                output_directory: bids_dir.as_str(),
                heuristic: heuristic.as_str(),
            };
            let mut argv = template.render(&values)?;
            if overwrite {
                argv.push(OVERWRITE_FLAG.to_string());
            }
            Ok(ConversionJob {
                subject: row.subject.to_string(),
                session: row.session.as_ref().map(ToString::to_string),
                command: display_command(&argv),
                argv,
            })
        })
        .collect()
}

/// Runs heudiconv for every row; the first failing row aborts the batch.
///
/// Template and heuristic are checked before any process is spawned.
pub fn convert_dicom_to_bids<R: CommandRunner + ?Sized>(
    runner: &R,
    manifest: &Manifest,
    request: &ConversionRequest,
    sink: &dyn ProgressSink,
) -> Result<Vec<ConversionJob>, PrepError> {
    let template = request.template.load()?;
    if !request.heuristic.as_std_path().exists() {
        return Err(PrepError::Configuration(format!(
            "heuristic file not found: {}",
            request.heuristic
        )));
    }

    let jobs = plan_conversion(
        manifest,
        &template,
        &request.heuristic,
        &request.bids_dir,
        request.overwrite,
    )?;

    let total = jobs.len();
    for (index, job) in jobs.iter().enumerate() {
        sink.event(ProgressEvent {
            message: format!("phase=Convert; [{}/{total}] {}", index + 1, job.command),
            elapsed: None,
        });
        info!(subject = %job.subject, session = ?job.session, "converting");
        let start = std::time::Instant::now();
        let status = runner.run(&job.argv).map_err(|err| match err {
            PrepError::MissingTool(program) => PrepError::Conversion {
                command: job.command.clone(),
                status: format!("{program} not found"),
            },
            other => other,
        })?;
        if let RunStatus::Failed { .. } = status {
            return Err(PrepError::Conversion {
                command: job.command.clone(),
                status: status.describe(),
            });
        }
        sink.event(ProgressEvent {
            message: format!("heudiconv finished for sub-{}", job.subject),
            elapsed: Some(start.elapsed()),
        });
    }
    Ok(jobs)
}
