//! Executable documents.
//!
//! A document describes one executable (its inputs, the action it runs, its
//! outputs and results) in YAML or JSON. The workflow compiler produces the
//! same shape; the CLI loads it from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use stepwise_types::{ExecutableResult, ExecutableType, Input, Output, SystemProperty};

use crate::dispatch::ActionDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutableDocument {
    pub name: String,
    #[serde(rename = "type", default = "default_executable_type")]
    pub executable_type: ExecutableType,
    #[serde(default)]
    pub inputs: Vec<Input>,
    pub action: ActionDescriptor,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub results: Vec<ExecutableResult>,
    #[serde(default)]
    pub system_properties: Vec<SystemProperty>,
}

fn default_executable_type() -> ExecutableType {
    ExecutableType::Operation
}

/// Parse an executable document from YAML (JSON is accepted as a subset).
pub fn parse_executable(content: &str) -> Result<ExecutableDocument> {
    let document: ExecutableDocument = serde_yaml::from_str(content).context("Failed to parse executable document")?;
    if document.name.trim().is_empty() {
        bail!("executable document is missing the required 'name'");
    }
    Ok(document)
}

/// Load an executable document from the filesystem.
///
/// # Examples
///
/// ```rust
/// use stepwise_engine::parse_executable_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let path = temp_dir.path().join("greet.yaml");
/// std::fs::write(&path, r#"
/// name: greet
/// action:
///   type: SCRIPTED
///   script: "greeting = 'hi'"
/// outputs:
///   - name: greeting
/// "#)?;
///
/// let document = parse_executable_file(&path)?;
/// assert_eq!(document.outputs.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_executable_file(file_path: impl AsRef<Path>) -> Result<ExecutableDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read executable file: {}", file_path.display()))?;
    parse_executable(&content).with_context(|| format!("Invalid executable file: {}", file_path.display()))
}
