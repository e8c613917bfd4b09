use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PrepError;

pub const INTENDED_FOR: &str = "IntendedFor";

/// A parsed JSON sidecar; key order is kept on rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    fields: Map<String, Value>,
}

impl Sidecar {
    pub fn read(path: &Utf8Path) -> Result<Self, PrepError> {
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| PrepError::sidecar(path, err))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Utf8Path, content: &str) -> Result<Self, PrepError> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(PrepError::sidecar(path, "top-level value is not an object")),
            Err(err) => Err(PrepError::sidecar(path, err)),
        }
    }

    /// `IntendedFor` entries; a bare string counts as a single entry.
    pub fn intended_for(&self, path: &Utf8Path) -> Result<Vec<String>, PrepError> {
        match self.fields.get(INTENDED_FOR) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(entry)) => Ok(vec![entry.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(entry) => Ok(entry.clone()),
                    other => Err(PrepError::sidecar(
                        path,
                        format!("{INTENDED_FOR} contains a non-string entry: {other}"),
                    )),
                })
                .collect(),
            Some(other) => Err(PrepError::sidecar(
                path,
                format!("{INTENDED_FOR} must be a string or an array, found {other}"),
            )),
        }
    }

    pub fn set_intended_for(&mut self, entries: Vec<String>) {
        let values = entries.into_iter().map(Value::String).collect();
        self.fields
            .insert(INTENDED_FOR.to_string(), Value::Array(values));
    }

    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.fields.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }

    /// Replaces the file through a temp file in the same directory.
    pub fn write_atomic(&self, path: &Utf8Path) -> Result<(), PrepError> {
        let bytes = self
            .to_pretty_bytes()
            .map_err(|err| PrepError::sidecar(path, err))?;
        let parent = path
            .parent()
            .ok_or_else(|| PrepError::sidecar(path, "no parent directory"))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".bidsprep-sidecar")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PrepError::sidecar(path, err))?;
        temp.write_all(&bytes)
            .map_err(|err| PrepError::sidecar(path, err))?;
        if let Ok(metadata) = fs::metadata(path.as_std_path()) {
            fs::set_permissions(temp.path(), metadata.permissions())
                .map_err(|err| PrepError::sidecar(path, err))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| PrepError::sidecar(path, err.error))?;
        Ok(())
    }
}

/// Set union of existing and new references, sorted.
pub fn merge_references(existing: Vec<String>, additions: &[String]) -> Vec<String> {
    existing
        .into_iter()
        .chain(additions.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
