//! Job opportunity record model.
//!
//! An [`Opportunity`] is one tracked application together with its ordered
//! interaction history. Values are validated on construction and again
//! before every write, so an invalid record never reaches disk.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub const DEFAULT_INTEREST_LEVEL: u8 = 3;
pub const MIN_INTEREST_LEVEL: i64 = 1;
pub const MAX_INTEREST_LEVEL: i64 = 5;

/// Prefix marking an interaction that carries generated assistant output.
pub const INSIGHT_TAG: &str = "[AI insight]";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("interest level must be between 1 and 5, got {0}")]
    InterestLevel(i64),

    #[error("invalid email format: {0}")]
    Email(String),
}

/// Current local wall-clock time at the resolution records are stored with.
pub fn now() -> NaiveDateTime {
    to_micros(Local::now().naive_local())
}

/// Drop precision finer than what [`timestamp::FORMAT`] writes.
pub fn to_micros(value: NaiveDateTime) -> NaiveDateTime {
    value
        .with_nanosecond(value.nanosecond() / 1_000 * 1_000)
        .unwrap_or(value)
}

/// Textual timestamp (de)serialization.
///
/// Writes `%Y-%m-%dT%H:%M:%S%.6f`. Reads that, RFC 3339 (converted to local
/// time), space separated date-times and bare dates, since older files were
/// written by several tools.
pub mod timestamp {
    use super::*;
    use serde::Serializer;

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(to_micros(dt.with_timezone(&Local).naive_local()));
        }

        for fmt in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(to_micros(dt));
            }
        }

        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    InitialContact,
    FollowUp,
    InterviewScreen,
    InterviewTechnical,
    InterviewFinal,
    Rejection,
    Offer,
    Other,
}

/// Values written by earlier versions of the tracker, mapped to their
/// closest current meaning. Anything not listed here becomes `Other`.
const LEGACY_INTERACTION_TYPES: [(&str, InteractionType); 6] = [
    ("interview", InteractionType::InterviewScreen),
    ("recruiter_email", InteractionType::InitialContact),
    ("recruiter_call", InteractionType::InitialContact),
    ("email", InteractionType::InitialContact),
    ("phone", InteractionType::InitialContact),
    ("linkedin", InteractionType::InitialContact),
];

impl InteractionType {
    pub const ALL: [InteractionType; 8] = [
        InteractionType::InitialContact,
        InteractionType::FollowUp,
        InteractionType::InterviewScreen,
        InteractionType::InterviewTechnical,
        InteractionType::InterviewFinal,
        InteractionType::Rejection,
        InteractionType::Offer,
        InteractionType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::InitialContact => "initial_contact",
            InteractionType::FollowUp => "follow_up",
            InteractionType::InterviewScreen => "interview_screen",
            InteractionType::InterviewTechnical => "interview_technical",
            InteractionType::InterviewFinal => "interview_final",
            InteractionType::Rejection => "rejection",
            InteractionType::Offer => "offer",
            InteractionType::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            InteractionType::InitialContact => "Initial Contact",
            InteractionType::FollowUp => "Follow-up",
            InteractionType::InterviewScreen => "Screening Interview",
            InteractionType::InterviewTechnical => "Technical Interview",
            InteractionType::InterviewFinal => "Final Interview",
            InteractionType::Rejection => "Rejection",
            InteractionType::Offer => "Offer",
            InteractionType::Other => "Other",
        }
    }

    /// Lenient conversion used when reading stored data. Never fails.
    pub fn coerce(raw: &str) -> Self {
        let key = raw.trim().to_lowercase();

        if let Some(kind) = Self::ALL.iter().find(|kind| kind.as_str() == key) {
            return *kind;
        }

        match LEGACY_INTERACTION_TYPES
            .iter()
            .find(|(legacy, _)| *legacy == key)
        {
            Some((_, modern)) => *modern,
            None => {
                log::debug!("unknown interaction type {raw:?}, using \"other\"");
                InteractionType::Other
            }
        }
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strict conversion for user input.
impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == key)
            .copied()
            .ok_or_else(|| {
                let valid = Self::ALL.map(|kind| kind.as_str()).join(", ");
                format!("unknown interaction type '{s}' (expected one of: {valid})")
            })
    }
}

impl<'de> Deserialize<'de> for InteractionType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Self::coerce(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    RecruiterEmail,
    RecruiterCall,
    InboundApplication,
    LinkedinMessage,
    Referral,
}

const LEGACY_CONTACT_METHODS: [(&str, ContactMethod); 5] = [
    ("email", ContactMethod::RecruiterEmail),
    ("phone", ContactMethod::RecruiterCall),
    ("call", ContactMethod::RecruiterCall),
    ("linkedin", ContactMethod::LinkedinMessage),
    ("application", ContactMethod::InboundApplication),
];

impl ContactMethod {
    pub const ALL: [ContactMethod; 5] = [
        ContactMethod::RecruiterEmail,
        ContactMethod::RecruiterCall,
        ContactMethod::InboundApplication,
        ContactMethod::LinkedinMessage,
        ContactMethod::Referral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::RecruiterEmail => "recruiter_email",
            ContactMethod::RecruiterCall => "recruiter_call",
            ContactMethod::InboundApplication => "inbound_application",
            ContactMethod::LinkedinMessage => "linkedin_message",
            ContactMethod::Referral => "referral",
        }
    }

    /// Lenient conversion used when reading stored data.
    /// Unknown values drop the method rather than the whole record.
    pub fn coerce(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }

        let found = Self::ALL
            .iter()
            .find(|method| method.as_str() == key)
            .copied()
            .or_else(|| {
                LEGACY_CONTACT_METHODS
                    .iter()
                    .find(|(legacy, _)| *legacy == key)
                    .map(|(_, modern)| *modern)
            });

        if found.is_none() {
            log::warn!("unknown contact method {raw:?}, dropping it");
        }
        found
    }
}

impl Display for ContactMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContactMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|method| method.as_str() == key)
            .copied()
            .ok_or_else(|| {
                let valid = Self::ALL.map(|method| method.as_str()).join(", ");
                format!("unknown contact method '{s}' (expected one of: {valid})")
            })
    }
}

fn deserialize_method<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ContactMethod>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(ContactMethod::coerce))
}

/// One dated event in an opportunity's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(with = "timestamp", default = "now")]
    pub date: NaiveDateTime,

    #[serde(rename = "type")]
    pub kind: InteractionType,

    #[serde(default, deserialize_with = "deserialize_method")]
    pub method: Option<ContactMethod>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl Interaction {
    pub fn new(kind: InteractionType) -> Self {
        Self {
            date: now(),
            kind,
            method: None,
            notes: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDateTime) -> Self {
        self.date = to_micros(date);
        self
    }

    pub fn with_method(mut self, method: Option<ContactMethod>) -> Self {
        self.method = method;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn is_insight(&self) -> bool {
        self.kind == InteractionType::Other
            && self
                .notes
                .as_deref()
                .map(|notes| notes.starts_with(INSIGHT_TAG))
                .unwrap_or(false)
    }
}

/// A tracked job application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    #[serde(with = "timestamp", default = "now")]
    pub timestamp: NaiveDateTime,
    pub company: String,
    pub role: String,
    #[serde(default)]
    pub recruiter_name: Option<String>,
    #[serde(default)]
    pub recruiter_contact: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub resume_text: Option<String>,
    #[serde(default)]
    pub cover_letter_text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub company_link: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_interest_level")]
    pub interest_level: u8,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_active() -> bool {
    true
}

fn default_interest_level() -> u8 {
    DEFAULT_INTEREST_LEVEL
}

impl Opportunity {
    pub fn new(company: &str, role: &str) -> Result<Self, ValidationError> {
        let opportunity = Self {
            timestamp: now(),
            company: company.trim().to_string(),
            role: role.trim().to_string(),
            recruiter_name: None,
            recruiter_contact: None,
            job_description: None,
            resume_text: None,
            cover_letter_text: None,
            notes: None,
            next_steps: None,
            company_link: None,
            source: None,
            active: true,
            interest_level: DEFAULT_INTEREST_LEVEL,
            interactions: Vec::new(),
            status: None,
        };
        opportunity.validate()?;
        Ok(opportunity)
    }

    /// Check every invariant. Run before writes and after reads.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.company.trim().is_empty() {
            return Err(ValidationError::Empty("company"));
        }
        if self.role.trim().is_empty() {
            return Err(ValidationError::Empty("role"));
        }
        validate_interest_level(self.interest_level as i64)?;
        if let Some(contact) = &self.recruiter_contact {
            validate_contact(contact)?;
        }
        Ok(())
    }

    pub fn set_interest_level(&mut self, level: i64) -> Result<(), ValidationError> {
        validate_interest_level(level)?;
        self.interest_level = level as u8;
        Ok(())
    }

    pub fn set_recruiter(
        &mut self,
        name: Option<String>,
        contact: Option<String>,
    ) -> Result<(), ValidationError> {
        let contact = contact.filter(|c| !c.trim().is_empty());
        if let Some(contact) = &contact {
            validate_contact(contact)?;
        }
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.recruiter_name = Some(name);
        }
        if contact.is_some() {
            self.recruiter_contact = contact;
        }
        Ok(())
    }

    pub fn add_interaction(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Appends generated text as a tagged `other` interaction.
    pub fn add_insight(&mut self, text: &str) {
        self.add_interaction(
            Interaction::new(InteractionType::Other)
                .with_notes(Some(format!("{INSIGHT_TAG} {}", text.trim()))),
        );
    }

    /// Interactions that involved the other side, i.e. everything but saved insights.
    pub fn contacts(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter().filter(|i| !i.is_insight())
    }

    /// Most recent contact by date. Ties resolve to the later entry.
    /// Saved insights never count, so they do not reset the overdue clock.
    pub fn latest_interaction(&self) -> Option<&Interaction> {
        self.contacts().max_by_key(|i| i.date)
    }

    /// Whole days since the latest interaction, if any.
    pub fn days_since_last_interaction(&self, now: NaiveDateTime) -> Option<i64> {
        self.latest_interaction()
            .map(|latest| (now - latest.date).num_days())
    }

    pub fn is_overdue(&self, days_threshold: i64, now: NaiveDateTime) -> bool {
        if !self.active {
            return false;
        }
        self.days_since_last_interaction(now)
            .map(|days| days > days_threshold)
            .unwrap_or(false)
    }

    pub fn deactivate(&mut self, status: Option<String>) {
        self.active = false;
        self.status = status.filter(|s| !s.trim().is_empty()).or(Some("inactive".to_string()));
    }
}

fn validate_interest_level(level: i64) -> Result<(), ValidationError> {
    if !(MIN_INTEREST_LEVEL..=MAX_INTEREST_LEVEL).contains(&level) {
        return Err(ValidationError::InterestLevel(level));
    }
    Ok(())
}

fn validate_contact(contact: &str) -> Result<(), ValidationError> {
    if contact.contains('@') && !EMAIL_RE.is_match(contact.trim()) {
        return Err(ValidationError::Email(contact.to_string()));
    }
    Ok(())
}

pub fn interest_level_description(level: u8) -> &'static str {
    match level {
        1 => "Very Low - Not interested",
        2 => "Low - Minimal interest",
        3 => "Medium - Somewhat interested",
        4 => "High - Very interested",
        5 => "Very High - Extremely interested",
        _ => "Unknown",
    }
}
