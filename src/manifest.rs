use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{SessionLabel, SubjectLabel};
use crate::error::PrepError;

#[derive(Debug, Deserialize)]
struct RawRow {
    subject_code: String,
    dicom_path: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRow {
    pub subject: SubjectLabel,
    pub session: Option<SessionLabel>,
    pub dicom_path: Utf8PathBuf,
}

/// Ordered subject/session/DICOM rows driving a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn new(rows: Vec<ManifestRow>) -> Self {
        Self { rows }
    }

    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let file =
            fs::File::open(path).map_err(|_| PrepError::ManifestRead(path.to_path_buf()))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PrepError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (index, record) in csv_reader.deserialize::<RawRow>().enumerate() {
            let raw = record.map_err(|err| PrepError::ManifestParse(err.to_string()))?;
            if raw.dicom_path.is_empty() {
                return Err(PrepError::ManifestParse(format!(
                    "row {}: dicom_path is empty",
                    index + 1
                )));
            }
            let session = raw
                .session_id
                .filter(|value| !value.trim().is_empty())
                .map(|value| value.parse())
                .transpose()?;
            rows.push(ManifestRow {
                subject: raw.subject_code.parse()?,
                session,
                dicom_path: Utf8PathBuf::from(raw.dicom_path),
            });
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unique subjects in first-seen order.
    pub fn subjects(&self) -> Vec<SubjectLabel> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.subject.clone()))
            .map(|row| row.subject.clone())
            .collect()
    }
}
