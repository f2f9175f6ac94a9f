//! File-per-record persistence for opportunities.
//!
//! Every opportunity lives in its own pretty-printed JSON document inside the
//! store directory. The directory scan in [`RecordStore::records`] is the
//! canonical view of all records; filtering, overdue detection, statistics and
//! export are all defined on top of it.
//!
//! A [`SimilarityIndex`] can be attached. The record file is always the
//! durability boundary: index maintenance after a write is best-effort and
//! only logged when it fails.

use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    opportunity::{self, Opportunity, ValidationError},
    semantic::SimilarityIndex,
    storage::{BackendLocal, StorageManager},
};

pub const RECORD_EXTENSION: &str = ".json";
pub const DEFAULT_OVERDUE_DAYS: i64 = 7;

const FILENAME_TIMESTAMP: &str = "%Y-%m-%dT%H-%M";
const EXPORT_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

const CSV_HEADERS: [&str; 11] = [
    "company",
    "role",
    "recruiter_name",
    "recruiter_contact",
    "interest_level",
    "active",
    "status",
    "source",
    "timestamp",
    "next_steps",
    "notes",
];

/// Stable key of a stored opportunity: the backing file name without its
/// extension. Assigned once on save and never derived again, so editing
/// company or role later does not change it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Accepts a bare identifier, a file name or a path to a record file.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = Path::new(raw.trim()).file_name()?.to_str()?;
        let stem = name.strip_suffix(RECORD_EXTENSION).unwrap_or(name);

        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        Some(RecordId(stem.to_string()))
    }

    fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(RECORD_EXTENSION)
            .filter(|stem| !stem.is_empty())
            .map(|stem| RecordId(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}{RECORD_EXTENSION}", self.0)
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opportunity together with the identifier it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: RecordId,
    pub opportunity: Opportunity,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("opportunity not found: {0}")]
    NotFound(RecordId),

    #[error("opportunity {id} is corrupt: {reason}")]
    Corrupt { id: RecordId, reason: String },

    #[error("invalid opportunity: {0}")]
    Validation(#[from] ValidationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// In-memory criteria applied over the full record listing.
///
/// Text criteria are case-insensitive substrings, except `status` which is a
/// case-insensitive exact match. Interest and date bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchFilters {
    pub company: Option<String>,
    pub role: Option<String>,
    pub recruiter: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    pub min_interest: Option<u8>,
    pub max_interest: Option<u8>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
}

impl SearchFilters {
    pub fn matches(&self, opp: &Opportunity) -> bool {
        if !contains_ci(Some(&opp.company), &self.company)
            || !contains_ci(Some(&opp.role), &self.role)
            || !contains_ci(opp.recruiter_name.as_ref(), &self.recruiter)
        {
            return false;
        }

        if let Some(status) = &self.status {
            match &opp.status {
                Some(s) if s.eq_ignore_ascii_case(status.trim()) => {}
                _ => return false,
            }
        }

        if self.active_only && !opp.active {
            return false;
        }

        if self.min_interest.is_some_and(|min| opp.interest_level < min)
            || self.max_interest.is_some_and(|max| opp.interest_level > max)
        {
            return false;
        }

        if self.date_from.is_some_and(|from| opp.timestamp < from)
            || self.date_to.is_some_and(|to| opp.timestamp > to)
        {
            return false;
        }

        true
    }
}

fn contains_ci(value: Option<&String>, needle: &Option<String>) -> bool {
    let Some(needle) = needle else {
        return true;
    };
    value
        .map(|v| v.to_lowercase().contains(&needle.trim().to_lowercase()))
        .unwrap_or(false)
}

/// Aggregate over all readable records. All zeros for an empty store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub avg_interest: f64,
    pub min_interest: u8,
    pub max_interest: u8,
    pub overdue: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

impl Statistics {
    pub fn from_opportunities<'a>(
        opportunities: impl IntoIterator<Item = &'a Opportunity>,
        now: NaiveDateTime,
    ) -> Self {
        let mut stats = Statistics::default();
        let mut interest_sum: u64 = 0;

        for opp in opportunities {
            stats.total += 1;
            if opp.active {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }

            interest_sum += opp.interest_level as u64;
            if stats.total == 1 {
                stats.min_interest = opp.interest_level;
                stats.max_interest = opp.interest_level;
            } else {
                stats.min_interest = stats.min_interest.min(opp.interest_level);
                stats.max_interest = stats.max_interest.max(opp.interest_level);
            }

            if opp.is_overdue(DEFAULT_OVERDUE_DAYS, now) {
                stats.overdue += 1;
            }

            *stats.by_status.entry(label_or_unknown(&opp.status)).or_default() += 1;
            *stats.by_source.entry(label_or_unknown(&opp.source)).or_default() += 1;
        }

        if stats.total > 0 {
            stats.avg_interest = interest_sum as f64 / stats.total as f64;
        }

        stats
    }
}

fn label_or_unknown(label: &Option<String>) -> String {
    label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct RecordStore {
    files: Box<dyn StorageManager>,
    index: Option<Arc<SimilarityIndex>>,
}

impl RecordStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::with_backend(Box::new(BackendLocal::new(dir)?)))
    }

    pub fn with_backend(files: Box<dyn StorageManager>) -> Self {
        Self { files, index: None }
    }

    /// Keep `index` in step with every save, update and delete.
    pub fn with_index(mut self, index: Arc<SimilarityIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn location(&self, id: &RecordId) -> PathBuf {
        self.files.location(&id.file_name())
    }

    /// Persist a new opportunity under a fresh identifier.
    pub fn save(&self, opp: &Opportunity) -> Result<RecordId, StoreError> {
        opp.validate()?;

        let id = self.unused_id(&record_stem(opp));
        let data = serde_json::to_vec_pretty(opp)?;
        self.files.write(&id.file_name(), &data)?;
        log::info!("saved opportunity to {}", self.location(&id).display());

        if let Some(index) = &self.index {
            if let Err(err) = index.add(&id, opp) {
                log::warn!("opportunity {id} saved but not indexed: {err}");
            }
        }

        Ok(id)
    }

    pub fn load(&self, id: &RecordId) -> Result<Opportunity, StoreError> {
        let name = id.file_name();
        if !self.files.exists(&name) {
            return Err(StoreError::NotFound(id.clone()));
        }

        let data = self.files.read(&name)?;
        let opp: Opportunity =
            serde_json::from_slice(&data).map_err(|err| StoreError::Corrupt {
                id: id.clone(),
                reason: err.to_string(),
            })?;

        opp.validate().map_err(|err| StoreError::Corrupt {
            id: id.clone(),
            reason: err.to_string(),
        })?;

        Ok(opp)
    }

    /// Overwrite an existing record in place. The identifier never changes.
    pub fn update(&self, id: &RecordId, opp: &Opportunity) -> Result<(), StoreError> {
        opp.validate()?;

        let name = id.file_name();
        if !self.files.exists(&name) {
            return Err(StoreError::NotFound(id.clone()));
        }

        let data = serde_json::to_vec_pretty(opp)?;
        self.files.write(&name, &data)?;
        log::info!("updated opportunity at {}", self.location(id).display());

        if let Some(index) = &self.index {
            // the index has no upsert, so drop the old projection first
            let reindexed = index.remove(id).and_then(|_| index.add(id, opp));
            if let Err(err) = reindexed {
                log::warn!("opportunity {id} updated but index is stale: {err}");
            }
        }

        Ok(())
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let name = id.file_name();
        if !self.files.exists(&name) {
            log::warn!("opportunity not found: {id}");
            return Ok(false);
        }

        self.files.delete(&name)?;
        log::info!("deleted opportunity {id}");

        if let Some(index) = &self.index {
            if let Err(err) = index.remove(id) {
                log::warn!("opportunity {id} deleted but still indexed: {err}");
            }
        }

        Ok(true)
    }

    /// Every readable record, newest first. Unreadable files are skipped.
    pub fn records(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();

        for name in self.files.list()? {
            let Some(id) = RecordId::from_file_name(&name) else {
                continue;
            };

            match self.load(&id) {
                Ok(opportunity) => records.push(Record { id, opportunity }),
                Err(err) => log::warn!("could not load {name}: {err}"),
            }
        }

        records.sort_by(|a, b| b.opportunity.timestamp.cmp(&a.opportunity.timestamp));
        Ok(records)
    }

    pub fn list(&self) -> Result<Vec<Opportunity>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| record.opportunity)
            .collect())
    }

    pub fn filter(&self, filters: &SearchFilters) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| filters.matches(&record.opportunity))
            .collect())
    }

    pub fn overdue(&self, days_threshold: i64) -> Result<Vec<Record>, StoreError> {
        let now = opportunity::now();
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.opportunity.is_overdue(days_threshold, now))
            .collect())
    }

    pub fn statistics(&self) -> Result<Statistics, StoreError> {
        let records = self.records()?;
        Ok(Statistics::from_opportunities(
            records.iter().map(|record| &record.opportunity),
            opportunity::now(),
        ))
    }

    /// Write key scalar fields of every record to a CSV file.
    /// Returns the number of rows written.
    pub fn export_csv(&self, destination: &Path) -> Result<usize, StoreError> {
        let file = std::fs::File::create(destination)?;
        let count = self.write_csv(file)?;
        log::info!("exported {count} opportunities to {}", destination.display());
        Ok(count)
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<usize, StoreError> {
        let records = self.records()?;

        let mut csv_wrt = csv::Writer::from_writer(writer);
        csv_wrt.write_record(CSV_HEADERS)?;
        for Record { opportunity: opp, .. } in records.iter() {
            csv_wrt.write_record([
                opp.company.as_str(),
                opp.role.as_str(),
                opp.recruiter_name.as_deref().unwrap_or_default(),
                opp.recruiter_contact.as_deref().unwrap_or_default(),
                &opp.interest_level.to_string(),
                &opp.active.to_string(),
                opp.status.as_deref().unwrap_or_default(),
                opp.source.as_deref().unwrap_or_default(),
                &opp.timestamp.format(EXPORT_TIMESTAMP).to_string(),
                opp.next_steps.as_deref().unwrap_or_default(),
                opp.notes.as_deref().unwrap_or_default(),
            ])?;
        }
        csv_wrt.flush()?;

        Ok(records.len())
    }

    fn unused_id(&self, stem: &str) -> RecordId {
        let mut candidate = RecordId(stem.to_string());
        let mut counter = 1;
        while self.files.exists(&candidate.file_name()) {
            candidate = RecordId(format!("{stem}_{counter}"));
            counter += 1;
        }
        candidate
    }
}

fn slug(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .replace(&[' ', '/', '\\'][..], "-")
        .trim_start_matches('.')
        .to_string()
}

fn record_stem(opp: &Opportunity) -> String {
    format!(
        "{}_{}_{}",
        slug(&opp.company),
        slug(&opp.role),
        opp.timestamp.format(FILENAME_TIMESTAMP)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::parse("acme_engineer_2024-01-01T10-00").unwrap();
        assert_eq!(id.file_name(), "acme_engineer_2024-01-01T10-00.json");

        let from_path = RecordId::parse("/data/opportunities/acme_engineer_2024-01-01T10-00.json");
        assert_eq!(from_path, Some(id));

        assert!(RecordId::parse("").is_none());
        assert!(RecordId::parse(".hidden").is_none());
    }

    #[test]
    fn test_slug_normalizes_names() {
        assert_eq!(slug("Big Co / Labs"), "big-co---labs");
        assert_eq!(slug(".NET Shop"), "net-shop");
    }

    #[test]
    fn test_record_stem_format() {
        let mut opp = Opportunity::new("Acme Corp", "Senior Engineer").unwrap();
        opp.timestamp = opportunity::timestamp::parse("2024-05-06T07:08:09").unwrap();
        assert_eq!(record_stem(&opp), "acme-corp_senior-engineer_2024-05-06T07-08");
    }

    #[test]
    fn test_filters_match() {
        let mut opp = Opportunity::new("Acme", "Backend Engineer").unwrap();
        opp.recruiter_name = Some("Jane Doe".into());
        opp.status = Some("Interviewing".into());
        opp.interest_level = 4;

        let filters = SearchFilters {
            company: Some("acm".into()),
            role: Some("ENGINEER".into()),
            recruiter: Some("jane".into()),
            status: Some("interviewing".into()),
            min_interest: Some(4),
            max_interest: Some(4),
            ..Default::default()
        };
        assert!(filters.matches(&opp));

        let no_recruiter = SearchFilters {
            recruiter: Some("bob".into()),
            ..Default::default()
        };
        assert!(!no_recruiter.matches(&opp));

        opp.active = false;
        let active_only = SearchFilters {
            active_only: true,
            ..Default::default()
        };
        assert!(!active_only.matches(&opp));
    }

    #[test]
    fn test_statistics_empty_is_zero() {
        let stats = Statistics::from_opportunities(Vec::<&Opportunity>::new(), opportunity::now());
        assert_eq!(stats, Statistics::default());
        assert_eq!(stats.avg_interest, 0.0);
    }
}
