use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    Dicom2BidsResult, FmriprepResult, HeuristicsResult, ProgressEvent, ProgressSink,
    ProgressSinkKind,
};
use crate::intended_for::ReconcileResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_dicom2bids(result: &Dicom2BidsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_intended_for(result: &ReconcileResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fmriprep(result: &FmriprepResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_heuristics(result: &HeuristicsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr and a plain summary on stdout.
pub struct ConsoleOutput {
    kind: ProgressSinkKind,
}

impl ConsoleOutput {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self { kind }
    }

    pub fn print_dicom2bids(result: &Dicom2BidsResult) {
        if result.dry_run {
            println!(
                "Dry run: would convert {} manifest rows and update fieldmap IntendedFor fields.",
                result.rows
            );
            for job in &result.conversions {
                println!("  {}", job.command);
            }
            return;
        }
        println!("Converted {} manifest rows.", result.conversions.len());
        match &result.intended_for {
            Some(reconciled) => Self::print_intended_for(reconciled),
            None => println!("Skipped IntendedFor update."),
        }
    }

    pub fn print_intended_for(result: &ReconcileResult) {
        println!(
            "Updated {} fieldmap sidecars ({} new IntendedFor entries).",
            result.updated.len(),
            result.entries_added()
        );
    }

    pub fn print_fmriprep(result: &FmriprepResult) {
        if result.dry_run {
            println!("Dry run: would run {}", result.command);
            return;
        }
        println!("fMRIPrep completed successfully!");
        println!("Derivatives: {}", result.output_dir);
    }

    pub fn print_heuristics(result: &HeuristicsResult) {
        if result.heuristics.is_empty() {
            println!("No heuristics found on the search path:");
            for path in &result.search_paths {
                println!("  {path}");
            }
        }
        for entry in &result.heuristics {
            println!("{:<24} {}", entry.name, entry.path);
        }
        for tool in &result.tools {
            let status = match (&tool.path, &tool.version) {
                (Some(_), Some(version)) => version.clone(),
                (Some(path), None) => path.clone(),
                (None, _) => "not installed".to_string(),
            };
            println!("tool {:<20} {status}", tool.program);
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let tag = match self.kind {
            ProgressSinkKind::Convert => "dicom2bids",
            ProgressSinkKind::Reconcile => "intended-for",
            ProgressSinkKind::Preprocess => "fmriprep",
        };
        match event.elapsed {
            Some(elapsed) => eprintln!("[{tag}] {} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("[{tag}] {}", event.message),
        }
    }
}
