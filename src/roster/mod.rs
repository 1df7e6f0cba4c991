//! Roster — read-only source of pairing declarations.
//!
//! DESIGN
//! ======
//! The core only ever sees the canonical `{primary, partner}` shape. Legacy
//! roster exports with other field names are converted once, at ingestion,
//! by [`normalize`]; nothing past this module knows those variants exist.

pub mod normalize;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("roster must be an object of group -> rows, got {0}")]
    Shape(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
}

/// Two participants declared as partners. The relation is symmetric:
/// either side may be looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingDeclaration {
    pub primary: RosterEntry,
    pub partner: RosterEntry,
}

impl PairingDeclaration {
    #[must_use]
    pub fn new(primary: (&str, &str), partner: (&str, &str)) -> Self {
        Self {
            primary: RosterEntry { id: primary.0.to_owned(), name: primary.1.to_owned() },
            partner: RosterEntry { id: partner.0.to_owned(), name: partner.1.to_owned() },
        }
    }
}

/// Supplier of pairing declarations.
pub trait Roster: Send + Sync {
    /// Declarations for `group` (canonical upper case).
    fn pairings(&self, group: &str) -> Vec<PairingDeclaration>;
}

/// Roster held fully in memory, typically loaded from a JSON file of the
/// form `{ "A": [row, ...], "B": [...] }`.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    groups: HashMap<String, Vec<PairingDeclaration>>,
}

impl StaticRoster {
    #[must_use]
    pub fn with_pairing(mut self, group: &str, declaration: PairingDeclaration) -> Self {
        self.groups
            .entry(group.trim().to_uppercase())
            .or_default()
            .push(declaration);
        self
    }

    /// Build from a parsed roster document, normalizing every row.
    ///
    /// # Errors
    ///
    /// Returns `Shape` if the document is not an object of arrays.
    pub fn from_json(doc: &serde_json::Value) -> Result<Self, RosterError> {
        let Some(groups) = doc.as_object() else {
            return Err(RosterError::Shape(json_kind(doc)));
        };

        let mut roster = Self::default();
        for (group, rows) in groups {
            let Some(rows) = rows.as_array() else {
                return Err(RosterError::Shape(json_kind(rows)));
            };
            for (index, row) in rows.iter().enumerate() {
                match normalize::normalize_row(row) {
                    Some(declaration) => roster = roster.with_pairing(group, declaration),
                    None => warn!(%group, index, "skipping roster row without usable ids"),
                }
            }
        }
        Ok(roster)
    }

    /// Load and normalize a roster file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a roster document.
    pub async fn load(path: &Path) -> Result<Self, RosterError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let doc: serde_json::Value = serde_json::from_str(&raw)?;
        let roster = Self::from_json(&doc)?;
        info!(path = %path.display(), pairings = roster.len(), "roster loaded");
        Ok(roster)
    }

    /// Total number of declarations across groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Roster for StaticRoster {
    fn pairings(&self, group: &str) -> Vec<PairingDeclaration> {
        self.groups.get(group).cloned().unwrap_or_default()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
