use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bidsprep::app::{App, Dicom2BidsOptions, ProgressSinkKind};
use bidsprep::config::{ConfigLoader, ResolvedConfig};
use bidsprep::convert::TemplateSource;
use bidsprep::error::PrepError;
use bidsprep::fmriprep::FmriprepConfig;
use bidsprep::manifest::Manifest;
use bidsprep::output::{ConsoleOutput, JsonOutput, OutputMode};
use bidsprep::process::SystemRunner;

#[derive(Parser)]
#[command(name = "bidsprep")]
#[command(about = "Convert DICOM directories to BIDS format and preprocess with fMRIPrep")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print JSON results instead of progress lines")]
    non_interactive: bool,

    #[arg(long, global = true, help = "Path to bidsprep.json")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert DICOMs to BIDS with heudiconv and update fieldmap IntendedFor")]
    Dicom2bids(Dicom2BidsArgs),
    #[command(about = "Only update fieldmap IntendedFor fields of an existing dataset")]
    IntendedFor(IntendedForArgs),
    #[command(about = "Run fMRIPrep on a BIDS dataset through fmriprep-docker")]
    Fmriprep(FmriprepArgs),
    #[command(about = "List heuristics on the search path and external tool versions")]
    Heuristics,
}

#[derive(Args)]
struct Dicom2BidsArgs {
    #[arg(help = "CSV file with subject_code, session_id and dicom_path columns")]
    participants_csv: PathBuf,

    #[arg(long, help = "Root output directory for the BIDS dataset")]
    bids_dir: Utf8PathBuf,

    #[arg(long, help = "Heuristic file path or name of a heuristic on the search path")]
    heuristic: String,

    #[arg(long, help = "File containing a custom heudiconv command template")]
    heudiconv_template: Option<Utf8PathBuf>,

    #[arg(long, help = "Pass --overwrite to heudiconv")]
    overwrite: bool,

    #[arg(long = "skip-intendedfor", help = "Skip updating IntendedFor fields")]
    skip_intended_for: bool,

    #[arg(long, help = "Print commands but do not run conversion")]
    dry_run: bool,
}

#[derive(Args)]
struct IntendedForArgs {
    #[arg(help = "CSV file with subject_code, session_id and dicom_path columns")]
    participants_csv: PathBuf,

    #[arg(long, help = "Root directory of the existing BIDS dataset")]
    bids_dir: Utf8PathBuf,
}

#[derive(Args)]
struct FmriprepArgs {
    #[arg(help = "Root directory of the BIDS dataset")]
    bids_dir: Utf8PathBuf,

    #[arg(help = "Directory for fMRIPrep derivatives")]
    output_dir: Utf8PathBuf,

    #[arg(long = "participant-label", num_args = 1.., help = "Subjects to process")]
    participant_label: Vec<String>,

    #[arg(long, help = "Take participant labels from a manifest CSV")]
    manifest: Option<PathBuf>,

    #[arg(long = "session-id", num_args = 1.., help = "Sessions to process")]
    session_id: Vec<String>,

    #[arg(long = "task-id", num_args = 1.., help = "Tasks to process")]
    task_id: Vec<String>,

    #[arg(long = "output-spaces", num_args = 1.., help = "Standard and native output spaces")]
    output_spaces: Vec<String>,

    #[arg(long, help = "FreeSurfer license file")]
    fs_license_file: Option<Utf8PathBuf>,

    #[arg(long, help = "Working directory for intermediate results")]
    work_dir: Option<Utf8PathBuf>,

    #[arg(long, help = "Maximum number of CPUs")]
    n_cpus: Option<u32>,

    #[arg(long, help = "Maximum threads per process")]
    omp_nthreads: Option<u32>,

    #[arg(long, help = "Memory limit in GB")]
    mem_gb: Option<f64>,

    #[arg(long, help = "JSON file filtering the BIDS query")]
    bids_filter_file: Option<Utf8PathBuf>,

    #[arg(long, help = "Skip BIDS validation of the input dataset")]
    skip_bids_validation: bool,

    #[arg(long, help = "Trade disk space for lower memory use")]
    low_mem: bool,

    #[arg(long, help = "fMRIPrep Docker image to run")]
    docker_image: Option<String>,

    #[arg(long, help = "Increase fMRIPrep log verbosity")]
    verbose: bool,

    #[arg(long, help = "Print the command but do not run fMRIPrep")]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::Configuration(_)
        | PrepError::ConfigRead(_)
        | PrepError::ConfigParse(_)
        | PrepError::ManifestRead(_)
        | PrepError::ManifestParse(_)
        | PrepError::InvalidSubjectLabel(_)
        | PrepError::InvalidSessionLabel(_) => 2,
        PrepError::Conversion { .. }
        | PrepError::Preprocessing { .. }
        | PrepError::MissingTool(_) => 3,
        PrepError::Dataset { .. } | PrepError::SidecarIo { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(SystemRunner::new(), config.heuristic_paths.clone())?;

    match cli.command {
        Commands::Dicom2bids(args) => run_dicom2bids(args, &config, &app, output_mode),
        Commands::IntendedFor(args) => run_intended_for(args, &app, output_mode),
        Commands::Fmriprep(args) => run_fmriprep(args, &config, &app, output_mode),
        Commands::Heuristics => {
            let result = app.heuristics();
            match output_mode {
                OutputMode::NonInteractive => {
                    JsonOutput::print_heuristics(&result).into_diagnostic()?
                }
                OutputMode::Interactive => ConsoleOutput::print_heuristics(&result),
            }
            Ok(())
        }
    }
}

fn run_dicom2bids(
    args: Dicom2BidsArgs,
    config: &ResolvedConfig,
    app: &App<SystemRunner>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let manifest = Manifest::load(&args.participants_csv)?;
    let template = match args
        .heudiconv_template
        .or_else(|| config.heudiconv_template.clone())
    {
        Some(path) => TemplateSource::File(path),
        None => TemplateSource::Builtin,
    };
    let options = Dicom2BidsOptions {
        template,
        heuristic: args.heuristic,
        bids_dir: args.bids_dir,
        overwrite: args.overwrite,
        skip_intended_for: args.skip_intended_for,
        dry_run: args.dry_run,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.dicom2bids(&manifest, options, &JsonOutput)?;
            JsonOutput::print_dicom2bids(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let sink = ConsoleOutput::new(ProgressSinkKind::Convert);
            let result = app.dicom2bids(&manifest, options, &sink)?;
            ConsoleOutput::print_dicom2bids(&result);
        }
    }
    Ok(())
}

fn run_intended_for(
    args: IntendedForArgs,
    app: &App<SystemRunner>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let manifest = Manifest::load(&args.participants_csv)?;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.intended_for(&args.bids_dir, &manifest, &JsonOutput)?;
            JsonOutput::print_intended_for(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let sink = ConsoleOutput::new(ProgressSinkKind::Reconcile);
            let result = app.intended_for(&args.bids_dir, &manifest, &sink)?;
            ConsoleOutput::print_intended_for(&result);
        }
    }
    Ok(())
}

fn run_fmriprep(
    args: FmriprepArgs,
    config: &ResolvedConfig,
    app: &App<SystemRunner>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut participant_label = args.participant_label;
    if let Some(path) = &args.manifest {
        let manifest = Manifest::load(path)?;
        for subject in manifest.subjects() {
            if !participant_label.iter().any(|label| label == subject.as_str()) {
                participant_label.push(subject.to_string());
            }
        }
    }

    let overrides = FmriprepConfig {
        bids_dir: Some(args.bids_dir),
        output_dir: Some(args.output_dir),
        participant_label,
        session_id: args.session_id,
        task_id: args.task_id,
        output_spaces: args.output_spaces,
        skip_bids_validation: args.skip_bids_validation.then_some(true),
        fs_license_file: args.fs_license_file,
        work_dir: args.work_dir,
        n_cpus: args.n_cpus,
        omp_nthreads: args.omp_nthreads,
        mem_gb: args.mem_gb,
        low_mem: args.low_mem.then_some(true),
        bids_filter_file: args.bids_filter_file,
        docker_image: args.docker_image,
        verbose: args.verbose.then_some(true),
    };
    let merged = config.fmriprep.clone().merged_with(overrides);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fmriprep(merged, args.dry_run, &JsonOutput)?;
            JsonOutput::print_fmriprep(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let sink = ConsoleOutput::new(ProgressSinkKind::Preprocess);
            let result = app.fmriprep(merged, args.dry_run, &sink)?;
            ConsoleOutput::print_fmriprep(&result);
        }
    }
    Ok(())
}
