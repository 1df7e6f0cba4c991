//! Legacy roster row normalization.
//!
//! Accepted shapes, in the order they are tried:
//! - `{primary: {id, name}, partner: {id, name}}` (canonical)
//! - `{studentA: {...}, studentB: {...}}`
//! - flat rows: `id|studentId|student_id`, `name|studentName|student_name`,
//!   `partnerId|partner_id|partnerStudentId`, `partnerName|partner_name|partnerStudentName`
//!
//! Entry objects themselves may spell their fields `id|studentId` and
//! `name|studentName`. Numeric ids are accepted and rendered as strings.

use serde_json::Value;

use super::{PairingDeclaration, RosterEntry};

const ID_FIELDS: &[&str] = &["id", "studentId", "student_id"];
const NAME_FIELDS: &[&str] = &["name", "studentName", "student_name"];
const PARTNER_ID_FIELDS: &[&str] = &["partnerId", "partner_id", "partnerStudentId"];
const PARTNER_NAME_FIELDS: &[&str] = &["partnerName", "partner_name", "partnerStudentName"];

/// Convert one roster row into a canonical declaration.
///
/// Returns `None` when the row names no partner id, or no primary id or name.
#[must_use]
pub fn normalize_row(row: &Value) -> Option<PairingDeclaration> {
    let (primary, partner) = nested_pair(row, "primary", "partner")
        .or_else(|| nested_pair(row, "studentA", "studentB"))
        .or_else(|| flat_pair(row))?;

    if partner.id.is_empty() || (primary.id.is_empty() && primary.name.is_empty()) {
        return None;
    }
    Some(PairingDeclaration { primary, partner })
}

fn nested_pair(row: &Value, a: &str, b: &str) -> Option<(RosterEntry, RosterEntry)> {
    let first = row.get(a)?;
    let second = row.get(b)?;
    if !first.is_object() || !second.is_object() {
        return None;
    }
    Some((entry(first, ID_FIELDS, NAME_FIELDS), entry(second, ID_FIELDS, NAME_FIELDS)))
}

fn flat_pair(row: &Value) -> Option<(RosterEntry, RosterEntry)> {
    if !row.is_object() {
        return None;
    }
    Some((entry(row, ID_FIELDS, NAME_FIELDS), entry(row, PARTNER_ID_FIELDS, PARTNER_NAME_FIELDS)))
}

fn entry(obj: &Value, id_fields: &[&str], name_fields: &[&str]) -> RosterEntry {
    RosterEntry { id: first_text(obj, id_fields), name: first_text(obj, name_fields) }
}

fn first_text(obj: &Value, fields: &[&str]) -> String {
    fields
        .iter()
        .filter_map(|field| match obj.get(*field)? {
            Value::String(s) => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}
