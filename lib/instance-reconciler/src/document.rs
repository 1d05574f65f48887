// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An editor for cloud-init style YAML documents.
//!
//! Only documents whose root node is a mapping can be edited. Anything else
//! (an empty text, a YAML syntax error, a top-level sequence or scalar) is
//! reported by [`ConfigDocument::parse`] as [`Unmanipulable`] so callers can
//! decide whether that matters for the edit they had in mind.
//!
//! Top-level key order is preserved across parse and serialize, as is the
//! block of comment lines at the head of the document (cloud-init keys off a
//! leading `#cloud-config` line). Comments elsewhere in the document, scalar
//! quoting, and indentation are not retained. A document that repeats a
//! mapping key is reported as malformed.

use std::fmt;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// The shape of a YAML node, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Null,
    Scalar,
    Sequence,
    Mapping,
    Tagged,
}

impl NodeKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => NodeKind::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                NodeKind::Scalar
            }
            Value::Sequence(_) => NodeKind::Sequence,
            Value::Mapping(_) => NodeKind::Mapping,
            Value::Tagged(_) => NodeKind::Tagged,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Null => "null",
            NodeKind::Scalar => "scalar",
            NodeKind::Sequence => "sequence",
            NodeKind::Mapping => "mapping",
            NodeKind::Tagged => "tagged node",
        };
        f.write_str(name)
    }
}

/// Why a text cannot be edited as a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unmanipulable {
    /// The text has no content besides whitespace and comments.
    Empty,
    /// The text is not valid YAML.
    Malformed(String),
    /// The text is valid YAML but its root is not a mapping.
    NotMapping(NodeKind),
}

impl fmt::Display for Unmanipulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unmanipulable::Empty => f.write_str("document is empty"),
            Unmanipulable::Malformed(e) => write!(f, "malformed YAML: {e}"),
            Unmanipulable::NotMapping(kind) => {
                write!(f, "document root is a {kind}, not a mapping")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("an empty key path was supplied")]
    EmptyPath,

    #[error("key {path:?} holds a {found} where a mapping was expected")]
    NotAMapping { path: Vec<String>, found: NodeKind },

    #[error("failed to serialize document")]
    Serialize(#[source] serde_yaml::Error),
}

/// A parsed document with a mapping at its root.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigDocument {
    preamble: Vec<String>,
    root: Mapping,
}

impl ConfigDocument {
    /// Creates a document with an empty root mapping and no preamble.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, Unmanipulable> {
        let mut preamble = Vec::new();
        let mut has_content = false;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('#') {
                has_content = true;
                break;
            }
            preamble.push(line.trim_end().to_owned());
        }

        if !has_content {
            return Err(Unmanipulable::Empty);
        }

        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| Unmanipulable::Malformed(e.to_string()))?;

        match value {
            Value::Mapping(root) => Ok(Self { preamble, root }),
            other => Err(Unmanipulable::NotMapping(NodeKind::of(&other))),
        }
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    /// The comment lines that precede the document body.
    pub fn preamble(&self) -> &[String] {
        &self.preamble
    }

    /// Returns true if the root mapping has no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Looks up the value at `path`, descending through nested mappings.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.root.get(*first)?;
        for key in rest {
            value = value.as_mapping()?.get(*key)?;
        }
        Some(value)
    }

    /// Returns the value at `path`, creating it (as null) if it does not
    /// exist. Missing or null intermediate keys become empty mappings. New
    /// keys are appended after their existing siblings.
    pub fn find_or_insert_key(
        &mut self,
        path: &[&str],
    ) -> Result<&mut Value, DocumentError> {
        let (last, parents) =
            path.split_last().ok_or(DocumentError::EmptyPath)?;

        let mut map = &mut self.root;
        for (depth, key) in parents.iter().enumerate() {
            let entry = map
                .entry(Value::from(*key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if entry.is_null() {
                *entry = Value::Mapping(Mapping::new());
            }

            map = match entry {
                Value::Mapping(m) => m,
                other => {
                    return Err(DocumentError::NotAMapping {
                        path: path[..=depth]
                            .iter()
                            .map(|k| (*k).to_owned())
                            .collect(),
                        found: NodeKind::of(other),
                    })
                }
            };
        }

        Ok(map.entry(Value::from(*last)).or_insert(Value::Null))
    }

    /// Removes the key at `path`, keeping the order of the keys around it.
    /// Returns true if a key was removed.
    pub fn remove_key(&mut self, path: &[&str]) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };

        let mut map = &mut self.root;
        for key in parents {
            map = match map.get_mut(*key) {
                Some(Value::Mapping(m)) => m,
                _ => return false,
            };
        }

        map.shift_remove(*last).is_some()
    }

    /// Makes sure `line` appears in the preamble, inserting it as the first
    /// line if it is missing. Returns true if the preamble changed.
    pub fn ensure_preamble_line(&mut self, line: &str) -> bool {
        if self.preamble.iter().any(|l| l.trim() == line) {
            return false;
        }
        self.preamble.insert(0, line.to_owned());
        true
    }

    pub fn serialize(&self) -> Result<String, DocumentError> {
        let body = serde_yaml::to_string(&self.root)
            .map_err(DocumentError::Serialize)?;

        let preamble_len: usize =
            self.preamble.iter().map(|l| l.len() + 1).sum();
        let mut out = String::with_capacity(body.len() + preamble_len);
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&body);
        Ok(out)
    }
}
