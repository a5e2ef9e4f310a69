//! Named config documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The config documents the engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentName {
    Theme,
    Ui,
    Commands,
}

impl DocumentName {
    pub const ALL: [Self; 3] = [Self::Theme, Self::Ui, Self::Commands];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Ui => "ui",
            Self::Commands => "commands",
        }
    }

    /// `<name>.json`
    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Recognize a document from its backing file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_name()?.to_str()?.strip_suffix(".json")?;
        stem.parse().ok()
    }
}

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theme" => Ok(Self::Theme),
            "ui" => Ok(Self::Ui),
            "commands" => Ok(Self::Commands),
            other => Err(format!("unknown config document: {other}")),
        }
    }
}

/// A loaded document and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub name: DocumentName,
    /// Top-level `version` of the body, if any. Informational only.
    pub version: Option<u64>,
    pub body: Value,
    pub source_path: PathBuf,
}

impl ConfigDocument {
    pub fn new(name: DocumentName, body: Value, source_path: PathBuf) -> Self {
        let version = body.get("version").and_then(Value::as_u64);
        Self {
            name,
            version,
            body,
            source_path,
        }
    }
}
