pub mod app;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fmriprep;
pub mod heuristics;
pub mod intended_for;
pub mod layout;
pub mod manifest;
pub mod output;
pub mod process;
pub mod sidecar;
pub mod template;
