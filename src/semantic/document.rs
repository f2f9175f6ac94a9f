//! Projection of an opportunity into the text and metadata that get indexed.
//!
//! The document text is what gets embedded: key scalar fields one per line,
//! followed by the interaction history. Metadata travels with the vector so
//! queries can filter without touching the record files.

use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{opportunity::Opportunity, store::RecordId};

/// Embedding providers reject overly long input.
const MAX_DOCUMENT_CHARS: usize = 8000;

const TRUNCATION_SUFFIX: &str = "...";

const INTERACTION_DATE: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub record_id: RecordId,
    pub company: String,
    pub role: String,
    pub recruiter: Option<String>,
    pub interest_level: u8,
    pub active: bool,
    pub status: Option<String>,
    pub source: Option<String>,
    #[serde(with = "crate::opportunity::timestamp")]
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
    pub content_hash: u64,
}

impl IndexedDocument {
    pub fn from_opportunity(id: &RecordId, opp: &Opportunity) -> Self {
        let text = document_text(opp);
        let content_hash = content_hash(&text);

        IndexedDocument {
            text,
            content_hash,
            metadata: DocumentMetadata {
                record_id: id.clone(),
                company: opp.company.clone(),
                role: opp.role.clone(),
                recruiter: opp.recruiter_name.clone(),
                interest_level: opp.interest_level,
                active: opp.active,
                status: opp.status.clone(),
                source: opp.source.clone(),
                timestamp: opp.timestamp,
            },
        }
    }
}

fn or_placeholder<'a>(value: &'a Option<String>, placeholder: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(placeholder)
}

pub fn document_text(opp: &Opportunity) -> String {
    let status = if opp.active {
        "Active"
    } else {
        or_placeholder(&opp.status, "Inactive")
    };

    let mut lines = vec![
        format!("Company: {}", opp.company),
        format!("Role: {}", opp.role),
        format!("Recruiter: {}", or_placeholder(&opp.recruiter_name, "Unknown")),
        format!("Contact: {}", or_placeholder(&opp.recruiter_contact, "Unknown")),
        format!("Status: {status}"),
        format!("Interest Level: {}/5", opp.interest_level),
        format!("Source: {}", or_placeholder(&opp.source, "Unknown")),
        format!("Next Steps: {}", or_placeholder(&opp.next_steps, "None")),
        format!("Notes: {}", or_placeholder(&opp.notes, "None")),
        format!("Job Description: {}", or_placeholder(&opp.job_description, "None")),
        format!("Resume Used: {}", or_placeholder(&opp.resume_text, "None")),
        format!("Cover Letter: {}", or_placeholder(&opp.cover_letter_text, "None")),
        String::new(),
        "Interactions:".to_string(),
    ];

    for interaction in &opp.interactions {
        lines.push(format!(
            "- [{}] {}: {}",
            interaction.date.format(INTERACTION_DATE),
            interaction.kind,
            or_placeholder(&interaction.notes, "No notes"),
        ));
    }

    truncate(&lines.join("\n"))
}

fn truncate(content: &str) -> String {
    if content.chars().count() <= MAX_DOCUMENT_CHARS {
        return content.to_string();
    }

    let max_chars = MAX_DOCUMENT_CHARS - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{truncated}{TRUNCATION_SUFFIX}")
}

/// Change detection: an entry whose hash matches needs no re-embedding.
pub fn content_hash(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::{Interaction, InteractionType};

    fn sample() -> Opportunity {
        let mut opp = Opportunity::new("Acme", "Engineer").unwrap();
        opp.recruiter_name = Some("Jane".into());
        opp.notes = Some("remote friendly".into());
        opp
    }

    #[test]
    fn test_document_text_layout() {
        let mut opp = sample();
        let date = crate::opportunity::timestamp::parse("2024-03-01 09:30:00").unwrap();
        opp.add_interaction(
            Interaction::new(InteractionType::FollowUp)
                .with_date(date)
                .with_notes(Some("pinged".into())),
        );

        let text = document_text(&opp);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Company: Acme");
        assert_eq!(lines[1], "Role: Engineer");
        assert_eq!(lines[2], "Recruiter: Jane");
        assert_eq!(lines[3], "Contact: Unknown");
        assert_eq!(lines[4], "Status: Active");
        assert_eq!(lines[5], "Interest Level: 3/5");
        assert!(text.contains("Notes: remote friendly"));
        assert!(text.ends_with("Interactions:\n- [2024-03-01 09:30] follow_up: pinged"));
    }

    #[test]
    fn test_inactive_status_label() {
        let mut opp = sample();
        opp.deactivate(Some("rejected".into()));
        assert!(document_text(&opp).contains("Status: rejected"));

        opp.status = None;
        assert!(document_text(&opp).contains("Status: Inactive"));
    }

    #[test]
    fn test_truncation() {
        let mut opp = sample();
        opp.job_description = Some("x".repeat(MAX_DOCUMENT_CHARS * 2));

        let text = document_text(&opp);
        assert_eq!(text.chars().count(), MAX_DOCUMENT_CHARS);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_metadata_projection() {
        let opp = sample();
        let id = RecordId::parse("acme_engineer_2024-01-01T10-00").unwrap();
        let doc = IndexedDocument::from_opportunity(&id, &opp);

        assert_eq!(doc.metadata.record_id, id);
        assert_eq!(doc.metadata.company, "Acme");
        assert_eq!(doc.metadata.recruiter.as_deref(), Some("Jane"));
        assert!(doc.metadata.active);
        assert_eq!(doc.content_hash, content_hash(&doc.text));
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let opp = sample();
        let mut edited = opp.clone();
        edited.notes = Some("on site".into());

        assert_eq!(content_hash(&document_text(&opp)), content_hash(&document_text(&opp)));
        assert_ne!(content_hash(&document_text(&opp)), content_hash(&document_text(&edited)));
    }
}
