//! One-shot import of records written by earlier versions of the tracker.
//!
//! Old files kept a single interaction as flat `interaction_*` fields next
//! to the opportunity. Current-shape files may still lack fields that were
//! added later. Both are converted to a valid [`Opportunity`] and saved
//! through the store under fresh identifiers.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::opportunity::{
    now, timestamp, ContactMethod, Interaction, InteractionType, Opportunity, ValidationError,
    DEFAULT_INTEREST_LEVEL,
};
use crate::store::{RecordId, RecordStore, StoreError, RECORD_EXTENSION};

const SCALAR_FIELDS: [&str; 12] = [
    "company",
    "role",
    "recruiter_name",
    "recruiter_contact",
    "job_description",
    "resume_text",
    "cover_letter_text",
    "notes",
    "next_steps",
    "company_link",
    "source",
    "status",
];

#[derive(thiserror::Error, Debug)]
pub enum LegacyError {
    #[error("expected a json object")]
    NotAnObject,

    #[error("unreadable record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<RecordId>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Convert one legacy JSON document into a validated opportunity.
pub fn convert(value: Value) -> Result<Opportunity, LegacyError> {
    let Value::Object(map) = value else {
        return Err(LegacyError::NotAnObject);
    };

    let opportunity = if is_flat_shape(&map) {
        convert_flat(map)?
    } else {
        convert_current(map)?
    };

    opportunity.validate()?;
    Ok(opportunity)
}

fn is_flat_shape(map: &Map<String, Value>) -> bool {
    map.contains_key("interaction_date") && map.contains_key("interaction_type")
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn convert_flat(map: Map<String, Value>) -> Result<Opportunity, LegacyError> {
    let mut current = Map::new();
    for field in SCALAR_FIELDS {
        if let Some(value) = map.get(field) {
            current.insert(field.to_string(), value.clone());
        }
    }
    for field in ["timestamp", "active", "interest_level"] {
        if let Some(value) = map.get(field) {
            current.insert(field.to_string(), value.clone());
        }
    }

    let mut opportunity = convert_current(current)?;

    if let (Some(date), Some(kind)) = (
        non_empty_str(&map, "interaction_date"),
        non_empty_str(&map, "interaction_type"),
    ) {
        let date = timestamp::parse(date).unwrap_or_else(|| {
            log::warn!("unparseable interaction date {date:?}, using current time");
            now()
        });
        let method = non_empty_str(&map, "interaction_method").and_then(ContactMethod::coerce);
        let notes = non_empty_str(&map, "interaction_notes").map(str::to_string);

        opportunity.interactions = vec![Interaction::new(InteractionType::coerce(kind))
            .with_date(date)
            .with_method(method)
            .with_notes(notes)];
    }

    Ok(opportunity)
}

fn convert_current(mut map: Map<String, Value>) -> Result<Opportunity, LegacyError> {
    fill_missing(&mut map, "timestamp", || {
        Value::String(now().format(timestamp::FORMAT).to_string())
    });
    fill_missing(&mut map, "interactions", || Value::Array(Vec::new()));
    fill_missing(&mut map, "active", || Value::Bool(true));
    fill_missing(&mut map, "interest_level", || {
        Value::from(DEFAULT_INTEREST_LEVEL)
    });

    // some writers stored the level as a string
    if let Some(level) = map.get("interest_level").and_then(Value::as_str) {
        let level = level
            .trim()
            .parse::<u8>()
            .unwrap_or(DEFAULT_INTEREST_LEVEL);
        map.insert("interest_level".to_string(), Value::from(level));
    }

    Ok(serde_json::from_value(Value::Object(map))?)
}

fn fill_missing(map: &mut Map<String, Value>, key: &str, default: impl FnOnce() -> Value) {
    match map.get(key) {
        Some(Value::Null) | None => {
            map.insert(key.to_string(), default());
        }
        Some(_) => {}
    }
}

/// Convert and save every `*.json` file directly under `dir`.
///
/// A file that fails to read, convert or save is reported and skipped.
pub fn import_dir(store: &RecordStore, dir: &Path) -> Result<ImportReport, LegacyError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(RECORD_EXTENSION) && !name.starts_with('.'))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut report = ImportReport::default();

    for path in paths {
        match import_file(store, &path) {
            Ok(id) => {
                log::info!("imported {} as {id}", path.display());
                report.imported.push(id);
            }
            Err(err) => {
                log::error!("failed to import {}: {err}", path.display());
                report.failed.push((path, err.to_string()));
            }
        }
    }

    Ok(report)
}

fn import_file(store: &RecordStore, path: &Path) -> Result<RecordId, LegacyError> {
    let raw = std::fs::read(path)?;
    let value: Value = serde_json::from_slice(&raw)?;
    let opportunity = convert(value)?;
    Ok(store.save(&opportunity)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_shape_builds_one_interaction() {
        let opp = convert(json!({
            "timestamp": "2024-03-01T09:00:00",
            "company": "Acme",
            "role": "Engineer",
            "recruiter_name": "Jane",
            "interaction_date": "2024-03-02T10:15:00",
            "interaction_type": "recruiter_email",
            "interaction_method": "email",
            "interaction_notes": "reached out on a Friday",
        }))
        .unwrap();

        assert_eq!(opp.company, "Acme");
        assert_eq!(opp.recruiter_name.as_deref(), Some("Jane"));
        assert!(opp.active);
        assert_eq!(opp.interest_level, 3);
        assert_eq!(opp.interactions.len(), 1);

        let interaction = &opp.interactions[0];
        assert_eq!(interaction.kind, InteractionType::InitialContact);
        assert_eq!(interaction.method, Some(ContactMethod::RecruiterEmail));
        assert_eq!(interaction.notes.as_deref(), Some("reached out on a Friday"));
        assert_eq!(
            interaction.date.format("%Y-%m-%d %H:%M").to_string(),
            "2024-03-02 10:15"
        );
    }

    #[test]
    fn test_flat_shape_without_date_has_no_interaction() {
        let opp = convert(json!({
            "company": "Acme",
            "role": "Engineer",
            "interaction_date": null,
            "interaction_type": "interview",
        }))
        .unwrap();

        assert!(opp.interactions.is_empty());
    }

    #[test]
    fn test_current_shape_gets_defaults() {
        let opp = convert(json!({
            "company": "Globex",
            "role": "Analyst",
            "interest_level": null,
        }))
        .unwrap();

        assert!(opp.active);
        assert_eq!(opp.interest_level, 3);
        assert!(opp.interactions.is_empty());
    }

    #[test]
    fn test_string_interest_level() {
        let opp = convert(json!({
            "company": "Globex",
            "role": "Analyst",
            "interest_level": "5",
        }))
        .unwrap();

        assert_eq!(opp.interest_level, 5);
    }

    #[test]
    fn test_invalid_records_rejected() {
        assert!(matches!(convert(json!([1, 2])), Err(LegacyError::NotAnObject)));
        assert!(matches!(
            convert(json!({"company": " ", "role": "Analyst"})),
            Err(LegacyError::Invalid(_))
        ));
        assert!(matches!(
            convert(json!({"company": "Globex", "role": "Analyst", "interest_level": 9})),
            Err(LegacyError::Invalid(_))
        ));
    }
}
