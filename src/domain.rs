use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;

/// Scope marker for dataset-relative references inside sidecars.
pub const BIDS_URI_PREFIX: &str = "bids::";

fn normalize_label(value: &str, prefix: &str) -> Option<String> {
    let trimmed = value.trim();
    let label = trimmed.strip_prefix(prefix).unwrap_or(trimmed);
    let is_valid = !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric());
    is_valid.then(|| label.to_string())
}

/// Subject label without the `sub-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectLabel(String);

impl SubjectLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectLabel {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        normalize_label(value, "sub-")
            .map(Self)
            .ok_or_else(|| PrepError::InvalidSubjectLabel(value.to_string()))
    }
}

/// Session label without the `ses-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionLabel(String);

impl SessionLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionLabel {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        normalize_label(value, "ses-")
            .map(Self)
            .ok_or_else(|| PrepError::InvalidSessionLabel(value.to_string()))
    }
}

/// BIDS datatype directory a file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Anat,
    Func,
    Fmap,
    Dwi,
    Perf,
}

impl Datatype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::Anat => "anat",
            Datatype::Func => "func",
            Datatype::Fmap => "fmap",
            Datatype::Dwi => "dwi",
            Datatype::Perf => "perf",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "anat" => Some(Datatype::Anat),
            "func" => Some(Datatype::Func),
            "fmap" => Some(Datatype::Fmap),
            "dwi" => Some(Datatype::Dwi),
            "perf" => Some(Datatype::Perf),
            _ => None,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn subject_label_strips_prefix() {
        let label: SubjectLabel = "sub-001".parse().unwrap();
        assert_eq!(label.as_str(), "001");
        let label: SubjectLabel = " 002 ".parse().unwrap();
        assert_eq!(label.as_str(), "002");
    }

    #[test]
    fn subject_label_rejects_separators() {
        let err = "sub-01_x".parse::<SubjectLabel>().unwrap_err();
        assert_matches!(err, PrepError::InvalidSubjectLabel(_));
        let err = "sub-".parse::<SubjectLabel>().unwrap_err();
        assert_matches!(err, PrepError::InvalidSubjectLabel(_));
    }

    #[test]
    fn session_label_rejects_empty() {
        let err = "".parse::<SessionLabel>().unwrap_err();
        assert_matches!(err, PrepError::InvalidSessionLabel(_));
        assert_eq!("ses-pre".parse::<SessionLabel>().unwrap().as_str(), "pre");
    }
}
