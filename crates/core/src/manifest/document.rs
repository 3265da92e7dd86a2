//! In-memory dependency manifest.
//!
//! A thin wrapper over the manifest's JSON object that keeps unknown fields
//! and their original order, and gives typed access to the `version` field,
//! the four dependency blocks and the `workspaces` declaration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ManifestError;

/// A merged dependency block: package name to version-range string, sorted.
pub type DependencyMap = BTreeMap<String, String>;

/// The dependency blocks merged field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyBlock {
    Dependencies,
    DevDependencies,
    PeerDependencies,
    OptionalDependencies,
}

impl DependencyBlock {
    pub const ALL: [Self; 4] = [
        Self::Dependencies,
        Self::DevDependencies,
        Self::PeerDependencies,
        Self::OptionalDependencies,
    ];

    /// Key of this block in the manifest object.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "devDependencies",
            Self::PeerDependencies => "peerDependencies",
            Self::OptionalDependencies => "optionalDependencies",
        }
    }
}

impl fmt::Display for DependencyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A package manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest {
    fields: Map<String, Value>,
}

impl DependencyManifest {
    /// Parse manifest text. `origin` names the source in error messages.
    pub fn parse(origin: &str, text: &str) -> Result<Self, ManifestError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ManifestError::Parse {
            path: origin.to_string(),
            detail: e.to_string(),
        })?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ManifestError::Parse {
                path: origin.to_string(),
                detail: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Read and parse a manifest from disk.
    pub fn read_from(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Write the manifest: two-space indentation and a trailing newline.
    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        std::fs::write(path, self.to_pretty_string()).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Serialized form, two-space indented with a trailing newline.
    pub fn to_pretty_string(&self) -> String {
        // Serializing an in-memory JSON map is infallible.
        let mut out = serde_json::to_string_pretty(&self.fields).unwrap_or_default();
        out.push('\n');
        out
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The `version` field, when present as a string.
    pub fn version(&self) -> Option<&str> {
        self.fields.get("version").and_then(Value::as_str)
    }

    /// The raw `version` value, whatever its JSON type.
    pub fn version_value(&self) -> Option<&Value> {
        self.fields.get("version")
    }

    pub fn set_version(&mut self, version: &str) {
        self.fields
            .insert("version".into(), Value::String(version.to_string()));
    }

    /// A dependency block as a sorted map; `None` when the block is absent.
    pub fn block(&self, block: DependencyBlock) -> Result<Option<DependencyMap>, ManifestError> {
        let Some(value) = self.fields.get(block.key()) else {
            return Ok(None);
        };
        let Value::Object(entries) = value else {
            return Err(ManifestError::MalformedBlock {
                block: block.key().into(),
                detail: format!("expected an object, found {}", json_kind(value)),
            });
        };

        entries
            .iter()
            .map(|(name, range)| match range {
                Value::String(s) => Ok((name.clone(), s.clone())),
                other => Err(ManifestError::MalformedBlock {
                    block: block.key().into(),
                    detail: format!("'{name}' maps to {}, expected a string", json_kind(other)),
                }),
            })
            .collect::<Result<DependencyMap, _>>()
            .map(Some)
    }

    /// Replace a dependency block. An empty map removes the block.
    ///
    /// An existing block keeps its position among the other fields; a new
    /// block is appended.
    pub fn set_block(&mut self, block: DependencyBlock, entries: DependencyMap) {
        if entries.is_empty() {
            self.fields.retain(|key, _| key != block.key());
            return;
        }
        let object: Map<String, Value> = entries
            .into_iter()
            .map(|(name, range)| (name, Value::String(range)))
            .collect();
        self.fields.insert(block.key().into(), Value::Object(object));
    }

    /// Workspace globs, from either `"workspaces": [...]` or
    /// `"workspaces": { "packages": [...] }`.
    pub fn workspaces(&self) -> Vec<String> {
        let list = match self.fields.get("workspaces") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(obj)) => match obj.get("packages") {
                Some(Value::Array(items)) => items,
                _ => return Vec::new(),
            },
            _ => return Vec::new(),
        };
        list.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
