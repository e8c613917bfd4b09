//! Minimal BIDS dataset index.
//!
//! Files are indexed by the entities encoded in their location:
//! `sub-<label>/[ses-<label>/]<datatype>/sub-<label>[_ses-<label>][_<key>-<value>...]_<suffix><extension>`.
//! Anything outside that shape is ignored, matching how a validating BIDS
//! layout only exposes valid files.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::{Datatype, SessionLabel, SubjectLabel};
use crate::error::PrepError;

pub const DATASET_DESCRIPTION: &str = "dataset_description.json";

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^sub-(?P<sub>[a-zA-Z0-9]+)(?:_ses-(?P<ses>[a-zA-Z0-9]+))?(?:_[a-zA-Z]+-[a-zA-Z0-9]+)*_[a-zA-Z0-9]+(?P<ext>\.[a-zA-Z0-9.]+)$",
    )
    .expect("filename pattern compiles")
});

/// An indexed file with its entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsFile {
    pub path: Utf8PathBuf,
    pub subject: SubjectLabel,
    pub session: Option<SessionLabel>,
    pub datatype: Datatype,
    /// Extension without the leading dot, e.g. `nii.gz`.
    pub extension: String,
}

/// Narrow query surface over a BIDS dataset.
pub trait DatasetIndex {
    fn root(&self) -> &Utf8Path;

    /// Files for `subject` of `datatype` with `extension`.
    ///
    /// `session: None` matches files from every session.
    fn find(
        &self,
        subject: &SubjectLabel,
        session: Option<&SessionLabel>,
        datatype: Datatype,
        extension: &str,
    ) -> Result<Vec<BidsFile>, PrepError>;
}

#[derive(Debug, Deserialize)]
struct DatasetDescription {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "BIDSVersion")]
    bids_version: String,
}

#[derive(Debug, Clone)]
pub struct BidsLayout {
    root: Utf8PathBuf,
    files: Vec<BidsFile>,
}

impl BidsLayout {
    /// Validates the dataset root and indexes every subject directory.
    pub fn open(root: &Utf8Path) -> Result<Self, PrepError> {
        if !root.as_std_path().is_dir() {
            return Err(PrepError::dataset(root, "not a directory"));
        }
        let description_path = root.join(DATASET_DESCRIPTION);
        let content = fs::read_to_string(description_path.as_std_path())
            .map_err(|_| PrepError::dataset(root, format!("missing {DATASET_DESCRIPTION}")))?;
        let description: DatasetDescription = serde_json::from_str(&content)
            .map_err(|err| PrepError::dataset(root, format!("{DATASET_DESCRIPTION}: {err}")))?;
        if description.name.trim().is_empty() || description.bids_version.trim().is_empty() {
            return Err(PrepError::dataset(
                root,
                format!("{DATASET_DESCRIPTION} requires non-empty Name and BIDSVersion"),
            ));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root.as_std_path())
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // skip derivatives, sourcedata and hidden trees at the top level
                entry.depth() != 1
                    || entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.starts_with("sub-"))
            });
        for entry in walker {
            let path = match entry {
                Ok(entry) if entry.file_type().is_file() => entry.into_path(),
                Ok(_) => continue,
                Err(err) => {
                    // annexed content that was never fetched still names a dataset file
                    let dangling = err
                        .path()
                        .filter(|path| is_dangling_link(path))
                        .map(Path::to_path_buf);
                    match dangling {
                        Some(path) => path,
                        None => return Err(PrepError::dataset(root, err)),
                    }
                }
            };
            let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                warn!("skipping non-UTF-8 path under {root}");
                continue;
            };
            if let Some(file) = classify(root, &path) {
                files.push(file);
            }
        }
        debug!(root = %root, files = files.len(), "indexed dataset");

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn files(&self) -> &[BidsFile] {
        &self.files
    }
}

impl DatasetIndex for BidsLayout {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn find(
        &self,
        subject: &SubjectLabel,
        session: Option<&SessionLabel>,
        datatype: Datatype,
        extension: &str,
    ) -> Result<Vec<BidsFile>, PrepError> {
        let extension = extension.trim_start_matches('.');
        Ok(self
            .files
            .iter()
            .filter(|file| &file.subject == subject)
            .filter(|file| session.is_none() || file.session.as_ref() == session)
            .filter(|file| file.datatype == datatype && file.extension == extension)
            .cloned()
            .collect())
    }
}

fn is_dangling_link(path: &Path) -> bool {
    path.is_symlink() && !path.exists()
}

fn classify(root: &Utf8Path, path: &Utf8Path) -> Option<BidsFile> {
    let relative = path.strip_prefix(root).ok()?;
    let components: Vec<&str> = relative.iter().collect();
    let (subject_dir, session_dir, datatype_dir, file_name) = match components.as_slice() {
        [sub, datatype, name] => (*sub, None, *datatype, *name),
        [sub, ses, datatype, name] => (*sub, Some(*ses), *datatype, *name),
        _ => return None,
    };

    let captures = FILENAME_RE.captures(file_name)?;
    let subject: SubjectLabel = subject_dir.strip_prefix("sub-")?.parse().ok()?;
    if captures.name("sub")?.as_str() != subject.as_str() {
        return None;
    }
    let session = match session_dir {
        Some(dir) => {
            let session: SessionLabel = dir.strip_prefix("ses-")?.parse().ok()?;
            if captures.name("ses").map(|m| m.as_str()) != Some(session.as_str()) {
                return None;
            }
            Some(session)
        }
        None if captures.name("ses").is_some() => return None,
        None => None,
    };
    let datatype = Datatype::from_dir_name(datatype_dir)?;
    let extension = captures.name("ext")?.as_str().trim_start_matches('.').to_string();

    Some(BidsFile {
        path: path.to_path_buf(),
        subject,
        session,
        datatype,
        extension,
    })
}
