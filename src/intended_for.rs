use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{BIDS_URI_PREFIX, Datatype};
use crate::error::PrepError;
use crate::layout::{BidsFile, DatasetIndex};
use crate::manifest::Manifest;
use crate::sidecar::{Sidecar, merge_references};

pub const FMAP_EXTENSION: &str = "json";
pub const FUNC_EXTENSION: &str = "nii.gz";

#[derive(Debug, Clone, Serialize)]
pub struct SidecarUpdate {
    pub path: String,
    pub added: usize,
    pub intended_for: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileResult {
    pub updated: Vec<SidecarUpdate>,
}

impl ReconcileResult {
    pub fn entries_added(&self) -> usize {
        self.updated.iter().map(|update| update.added).sum()
    }
}

/// `bids::<path relative to the dataset root>` with `/` separators.
pub fn bids_reference(index: &dyn DatasetIndex, file: &BidsFile) -> Result<String, PrepError> {
    let relative = file.path.strip_prefix(index.root()).map_err(|_| {
        PrepError::dataset(
            index.root(),
            format!("{} is outside the dataset root", file.path),
        )
    })?;
    let joined = relative.iter().collect::<Vec<_>>().join("/");
    Ok(format!("{BIDS_URI_PREFIX}{joined}"))
}

/// Adds every functional run of a row's subject/session to the
/// `IntendedFor` list of each fieldmap sidecar of that subject/session.
///
/// Entries are only ever added. The first unreadable or unwritable sidecar
/// aborts the whole batch.
pub fn update_intended_for(
    index: &dyn DatasetIndex,
    manifest: &Manifest,
    sink: &dyn ProgressSink,
) -> Result<ReconcileResult, PrepError> {
    let mut result = ReconcileResult::default();

    for row in manifest.rows() {
        let session = row.session.as_ref();
        let fmaps = index.find(&row.subject, session, Datatype::Fmap, FMAP_EXTENSION)?;
        if fmaps.is_empty() {
            sink.event(ProgressEvent {
                message: format!("phase=IntendedFor; no fieldmaps for sub-{}", row.subject),
                elapsed: None,
            });
            continue;
        }

        let additions = index
            .find(&row.subject, session, Datatype::Func, FUNC_EXTENSION)?
            .iter()
            .map(|file| bids_reference(index, file))
            .collect::<Result<Vec<_>, _>>()?;

        for fmap in &fmaps {
            let mut sidecar = Sidecar::read(&fmap.path)?;
            let existing = sidecar.intended_for(&fmap.path)?;
            let known: HashSet<&String> = existing.iter().collect();
            let added = additions
                .iter()
                .filter(|entry| !known.contains(entry))
                .collect::<HashSet<_>>()
                .len();
            let merged = merge_references(existing, &additions);
            sidecar.set_intended_for(merged.clone());
            sidecar.write_atomic(&fmap.path)?;

            info!(path = %fmap.path, added, total = merged.len(), "updated IntendedFor");
            sink.event(ProgressEvent {
                message: format!("phase=IntendedFor; {} (+{added})", fmap.path),
                elapsed: None,
            });
            result.updated.push(SidecarUpdate {
                path: fmap.path.to_string(),
                added,
                intended_for: merged,
            });
        }
    }

    Ok(result)
}
