//! Free-text advice from a chat completion model.
//!
//! Each operation assembles a prompt from records, statistics and similarity
//! hits and hands it to a [`CompletionProvider`]. Without a usable provider
//! every operation fails with [`InsightError::Unavailable`] before touching
//! the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::{ApiCredentials, InsightConfig},
    opportunity::{interest_level_description, Opportunity},
    semantic::SimilarityIndex,
    store::{Record, RecordId, RecordStore, Statistics, StoreError},
};

const TEMPERATURE: f32 = 0.7;
const RECENT_INTERACTIONS: usize = 3;
const REVIEW_RECORDS: usize = 5;
const OVERDUE_LISTED: usize = 5;
const SIMILAR_RECORDS: usize = 3;

const ASK_TOKENS: u32 = 1000;
const REVIEW_TOKENS: u32 = 1200;
const FOLLOW_UP_TOKENS: u32 = 1000;
const ANALYZE_TOKENS: u32 = 1200;
const EMAIL_TOKENS: u32 = 800;

#[derive(thiserror::Error, Debug)]
pub enum InsightError {
    #[error("AI assistant unavailable: {0}")]
    Unavailable(String),

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion API error: {0}")]
    Api(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait CompletionProvider: Send + Sync {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, InsightError>;

    fn model_name(&self) -> &str;

    fn unavailable_reason(&self) -> Option<&str> {
        None
    }
}

pub fn create_provider(config: &InsightConfig) -> Box<dyn CompletionProvider> {
    if !config.enabled {
        return Box::new(UnavailableCompletion::new("AI insights are disabled in config"));
    }

    let Some(credentials) = ApiCredentials::from_env() else {
        return Box::new(UnavailableCompletion::new(
            "OPENAI_API_KEY is not set. Set it with: export OPENAI_API_KEY=your-key-here",
        ));
    };

    match OpenAiChat::new(credentials, &config.model, Duration::from_secs(config.request_timeout_secs)) {
        Ok(chat) => Box::new(chat),
        Err(err) => Box::new(UnavailableCompletion::new(err.to_string())),
    }
}

pub struct UnavailableCompletion {
    reason: String,
}

impl UnavailableCompletion {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl CompletionProvider for UnavailableCompletion {
    fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String, InsightError> {
        Err(InsightError::Unavailable(self.reason.clone()))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }

    fn unavailable_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

pub struct OpenAiChat {
    credentials: ApiCredentials,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiChat {
    pub fn new(credentials: ApiCredentials, model: &str, timeout: Duration) -> Result<Self, InsightError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            credentials,
            model: model.to_string(),
            client,
        })
    }
}

impl CompletionProvider for OpenAiChat {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, InsightError> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.credentials.base_url))
            .header("Authorization", format!("Bearer {}", self.credentials.api_key))
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(InsightError::Api(format!(
                "request failed with status {status}: {error_text}"
            )));
        }

        let body: ChatResponse = response.json()?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InsightError::Api("no choices in response".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct InsightGenerator<'a> {
    store: &'a RecordStore,
    index: Option<&'a SimilarityIndex>,
    provider: &'a dyn CompletionProvider,
    overdue_days: i64,
}

impl<'a> InsightGenerator<'a> {
    pub fn new(
        store: &'a RecordStore,
        index: Option<&'a SimilarityIndex>,
        provider: &'a dyn CompletionProvider,
        overdue_days: i64,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            overdue_days,
        }
    }

    /// Answer a free-form question using the most relevant records, or the
    /// newest ones when nothing is indexed.
    pub fn ask(&self, question: &str, limit: usize) -> Result<String, InsightError> {
        self.ensure_available()?;

        let hits = self
            .index
            .map(|index| index.query(self.store, question, limit, &Default::default()))
            .unwrap_or_default();

        let opportunities: Vec<Opportunity> = if hits.is_empty() {
            self.store.list()?.into_iter().take(limit).collect()
        } else {
            hits.into_iter().map(|hit| hit.record.opportunity).collect()
        };

        let system = format!(
            "You are an intelligent job search assistant. You have access to a job tracker database with the following information:\n\n\
             {}\n\
             Relevant Job Opportunities:\n{}\n\n\
             Please provide helpful, actionable advice based on this data. Be specific and reference the actual opportunities when possible. Focus on:\n\
             - Patterns and insights\n\
             - Recommendations for next steps\n\
             - Suggestions for improving the job search\n\
             - Analysis of interest levels and statuses\n\
             - Follow-up recommendations\n\n\
             Keep your response concise but informative.",
            self.statistics_context()?,
            opportunities_context(opportunities.iter()),
        );

        self.provider.complete(&system, question, ASK_TOKENS)
    }

    /// Overall health check of the search.
    pub fn pipeline_review(&self) -> Result<String, InsightError> {
        self.ensure_available()?;

        let recent: Vec<Opportunity> = self.store.list()?.into_iter().take(REVIEW_RECORDS).collect();

        let system = format!(
            "You are an expert job search coach. Analyze this job search data and provide insights:\n\n\
             {}\n\
             Recent Opportunities:\n{}\n\n\
             Provide a comprehensive analysis including:\n\
             1. Overall job search health and progress\n\
             2. Patterns in the opportunities (companies, roles, sources)\n\
             3. Interest level analysis and recommendations\n\
             4. Follow-up strategy suggestions\n\
             5. Areas for improvement\n\
             6. Next steps to take\n\n\
             Be encouraging but honest. Provide specific, actionable advice.",
            self.statistics_context()?,
            opportunities_context(recent.iter()),
        );

        self.provider.complete(
            &system,
            "Please analyze my job search and provide insights and recommendations.",
            REVIEW_TOKENS,
        )
    }

    /// Follow-up suggestions for every active opportunity.
    pub fn follow_up_plan(&self) -> Result<String, InsightError> {
        self.ensure_available()?;

        let overdue = self.store.overdue(self.overdue_days)?;
        let active: Vec<Opportunity> = self
            .store
            .list()?
            .into_iter()
            .filter(|opp| opp.active)
            .collect();

        let system = format!(
            "You are a job search follow-up expert. Analyze these active opportunities and provide follow-up suggestions:\n\n\
             Active Opportunities:\n{}\n\n\
             Overdue Follow-ups: {} opportunities\n\n\
             For each opportunity, suggest:\n\
             1. Whether a follow-up is needed\n\
             2. What type of follow-up (email, call, LinkedIn message)\n\
             3. Suggested timing\n\
             4. Key points to mention\n\
             5. Tone and approach\n\n\
             Be specific and actionable. Consider the company, role, and previous interactions.",
            opportunities_context(active.iter()),
            overdue.len(),
        );

        self.provider.complete(
            &system,
            "Please suggest follow-up strategies for my active job opportunities.",
            FOLLOW_UP_TOKENS,
        )
    }

    /// Detailed assessment of one record, compared with its nearest
    /// neighbours in the index.
    pub fn analyze(&self, id: &RecordId) -> Result<String, InsightError> {
        self.ensure_available()?;

        let target = self.store.load(id)?;
        let similar: Vec<Opportunity> = self
            .index
            .map(|index| index.similar_to(self.store, id, SIMILAR_RECORDS))
            .unwrap_or_default()
            .into_iter()
            .map(|hit| hit.record.opportunity)
            .collect();

        let similar_context = if similar.is_empty() {
            "None".to_string()
        } else {
            opportunities_context(similar.iter())
        };

        let system = format!(
            "You are analyzing a specific job opportunity. Provide detailed insights:\n\n\
             Target Opportunity:\n{}\n\n\
             Similar Opportunities (for comparison):\n{}\n\n\
             Please provide:\n\
             1. Opportunity assessment and potential\n\
             2. Interest level analysis and recommendations\n\
             3. Follow-up strategy and timeline\n\
             4. Key talking points for interactions\n\
             5. Comparison with similar opportunities\n\
             6. Risk factors and considerations\n\
             7. Next steps and action items\n\n\
             Be thorough and provide specific, actionable advice.",
            opportunities_context(std::iter::once(&target)),
            similar_context,
        );

        self.provider.complete(
            &system,
            &format!(
                "Please analyze the opportunity at {} for the {} position.",
                target.company, target.role
            ),
            ANALYZE_TOKENS,
        )
    }

    /// Draft a follow-up email, optionally addressed to a different recruiter.
    pub fn follow_up_email(&self, id: &RecordId, recruiter: Option<&str>) -> Result<String, InsightError> {
        self.ensure_available()?;

        let target = self.store.load(id)?;
        let last_interaction = target
            .latest_interaction()
            .map(|i| i.date.format(DISPLAY_DATE).to_string())
            .unwrap_or_else(|| "None".to_string());

        let context = format!(
            "Company: {}\nRole: {}\nRecruiter: {}\nPrevious Contact: {}\nInterest Level: {}/5\nLast Interaction: {}\nNotes: {}",
            target.company,
            target.role,
            recruiter
                .or(target.recruiter_name.as_deref())
                .unwrap_or("Unknown"),
            target.recruiter_contact.as_deref().unwrap_or("Unknown"),
            target.interest_level,
            last_interaction,
            target.notes.as_deref().unwrap_or("None"),
        );

        let system = format!(
            "You are writing a professional follow-up email for a job opportunity. Use this context:\n\n\
             {context}\n\n\
             Write a professional, polite follow-up email that:\n\
             1. References the specific role and company\n\
             2. Shows continued interest\n\
             3. Asks about next steps or timeline\n\
             4. Is concise but friendly\n\
             5. Includes a clear call to action\n\
             6. Maintains professional tone\n\n\
             Format the email properly with subject line and body."
        );

        self.provider.complete(
            &system,
            "Please generate a follow-up email for this opportunity.",
            EMAIL_TOKENS,
        )
    }

    fn ensure_available(&self) -> Result<(), InsightError> {
        match self.provider.unavailable_reason() {
            Some(reason) => Err(InsightError::Unavailable(reason.to_string())),
            None => Ok(()),
        }
    }

    fn statistics_context(&self) -> Result<String, InsightError> {
        let stats = self.store.statistics()?;
        let overdue = self.store.overdue(self.overdue_days)?;
        Ok(statistics_context(&stats, &overdue))
    }
}

const DISPLAY_DATE: &str = "%Y-%m-%d %H:%M";

fn opportunities_context<'o>(opportunities: impl Iterator<Item = &'o Opportunity>) -> String {
    let mut parts = Vec::new();

    for (i, opp) in opportunities.enumerate() {
        parts.push(format!("Opportunity {}:", i + 1));
        parts.push(format!("  Company: {}", opp.company));
        parts.push(format!("  Role: {}", opp.role));
        parts.push(format!(
            "  Interest Level: {}/5 ({})",
            opp.interest_level,
            interest_level_description(opp.interest_level)
        ));
        parts.push(format!(
            "  Status: {}",
            if opp.active { "Active" } else { "Inactive" }
        ));
        parts.push(format!("  Source: {}", opp.source.as_deref().unwrap_or("Unknown")));
        parts.push(format!(
            "  Recruiter: {}",
            opp.recruiter_name.as_deref().unwrap_or("Unknown")
        ));
        parts.push(format!("  Next Steps: {}", opp.next_steps.as_deref().unwrap_or("None")));
        parts.push(format!("  Notes: {}", opp.notes.as_deref().unwrap_or("None")));

        if !opp.interactions.is_empty() {
            parts.push("  Recent Interactions:".to_string());
            let skip = opp.interactions.len().saturating_sub(RECENT_INTERACTIONS);
            for interaction in opp.interactions.iter().skip(skip) {
                parts.push(format!(
                    "    {} - {}: {}",
                    interaction.date.format(DISPLAY_DATE),
                    interaction.kind,
                    interaction.notes.as_deref().unwrap_or("No notes")
                ));
            }
        }

        parts.push(String::new());
    }

    if parts.is_empty() {
        return "No job opportunities found.".to_string();
    }

    parts.join("\n")
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn statistics_context(stats: &Statistics, overdue: &[Record]) -> String {
    let mut context = format!(
        "Job Search Statistics:\n\
         - Total Opportunities: {}\n\
         - Active Opportunities: {}\n\
         - Inactive Opportunities: {}\n\
         - Average Interest Level: {:.1}/5\n\n\
         Status Breakdown:\n",
        stats.total, stats.active, stats.inactive, stats.avg_interest
    );

    for (status, count) in &stats.by_status {
        context.push_str(&format!("- {}: {count}\n", title_case(status)));
    }

    context.push_str("\nSource Breakdown:\n");
    for (source, count) in &stats.by_source {
        context.push_str(&format!("- {}: {count}\n", title_case(source)));
    }

    if !overdue.is_empty() {
        context.push_str(&format!("\nOverdue Follow-ups ({}):\n", overdue.len()));
        for record in overdue.iter().take(OVERDUE_LISTED) {
            context.push_str(&format!(
                "- {} - {}\n",
                record.opportunity.company, record.opportunity.role
            ));
        }
    }

    context
}

/// Record `text` on the opportunity as an AI insight interaction.
pub fn save_insight(store: &RecordStore, id: &RecordId, text: &str) -> Result<(), StoreError> {
    let mut opp = store.load(id)?;
    opp.add_insight(text);
    store.update(id, &opp)?;
    log::info!("saved insight to {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::{Interaction, InteractionType};
    use std::sync::Mutex;

    /// Echoes the prompts back so tests can inspect them.
    struct RecordingProvider {
        calls: Mutex<Vec<(String, String, u32)>>,
    }

    impl RecordingProvider {
        fn new() -> Self {
            Self {
                calls: Mutex::new(vec![]),
            }
        }

        fn last(&self) -> (String, String, u32) {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl CompletionProvider for RecordingProvider {
        fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, InsightError> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string(), max_tokens));
            Ok("advice".to_string())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn store_with_records() -> (tempfile::TempDir, RecordStore, RecordId) {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(tmp.path()).unwrap();

        let mut acme = Opportunity::new("Acme", "Engineer").unwrap();
        acme.recruiter_name = Some("Jane".into());
        acme.source = Some("linkedin".into());
        for n in 0..5 {
            acme.add_interaction(
                Interaction::new(InteractionType::FollowUp).with_notes(Some(format!("note {n}"))),
            );
        }
        let acme_id = store.save(&acme).unwrap();

        let mut globex = Opportunity::new("Globex", "Manager").unwrap();
        globex.deactivate(Some("rejected".into()));
        store.save(&globex).unwrap();

        (tmp, store, acme_id)
    }

    #[test]
    fn test_unavailable_provider_short_circuits() {
        let (_tmp, store, id) = store_with_records();
        let provider = UnavailableCompletion::new("no key");
        let generator = InsightGenerator::new(&store, None, &provider, 7);

        assert!(matches!(generator.ask("anything", 5), Err(InsightError::Unavailable(_))));
        assert!(matches!(generator.pipeline_review(), Err(InsightError::Unavailable(_))));
        assert!(matches!(generator.analyze(&id), Err(InsightError::Unavailable(_))));
    }

    #[test]
    fn test_ask_falls_back_to_newest_records() {
        let (_tmp, store, _) = store_with_records();
        let provider = RecordingProvider::new();
        let generator = InsightGenerator::new(&store, None, &provider, 7);

        assert_eq!(generator.ask("Which companies?", 10).unwrap(), "advice");

        let (system, user, tokens) = provider.last();
        assert_eq!(user, "Which companies?");
        assert_eq!(tokens, ASK_TOKENS);
        assert!(system.contains("Total Opportunities: 2"));
        assert!(system.contains("Company: Acme"));
        assert!(system.contains("Company: Globex"));
        assert!(system.contains("- Rejected: 1"));
    }

    #[test]
    fn test_context_keeps_last_three_interactions() {
        let (_tmp, store, id) = store_with_records();
        let opp = store.load(&id).unwrap();

        let context = opportunities_context(std::iter::once(&opp));
        assert!(!context.contains("note 1"));
        assert!(context.contains("note 2"));
        assert!(context.contains("note 4"));
        assert!(context.contains("(Medium - Somewhat interested)"));
    }

    #[test]
    fn test_follow_up_plan_only_active() {
        let (_tmp, store, _) = store_with_records();
        let provider = RecordingProvider::new();
        let generator = InsightGenerator::new(&store, None, &provider, 7);

        generator.follow_up_plan().unwrap();
        let (system, _, _) = provider.last();
        assert!(system.contains("Company: Acme"));
        assert!(!system.contains("Company: Globex"));
    }

    #[test]
    fn test_email_uses_recruiter_override() {
        let (_tmp, store, id) = store_with_records();
        let provider = RecordingProvider::new();
        let generator = InsightGenerator::new(&store, None, &provider, 7);

        generator.follow_up_email(&id, Some("Bob")).unwrap();
        let (system, _, tokens) = provider.last();
        assert!(system.contains("Recruiter: Bob"));
        assert_eq!(tokens, EMAIL_TOKENS);
    }

    #[test]
    fn test_analyze_missing_record() {
        let (_tmp, store, _) = store_with_records();
        let provider = RecordingProvider::new();
        let generator = InsightGenerator::new(&store, None, &provider, 7);

        let missing = RecordId::parse("nobody_nothing_2020-01-01T00-00").unwrap();
        assert!(matches!(
            generator.analyze(&missing),
            Err(InsightError::Store(StoreError::NotFound(_)))
        ));
    }

    #[test]
    fn test_save_insight_appends_tagged_interaction() {
        let (_tmp, store, id) = store_with_records();

        save_insight(&store, &id, "Follow up on Friday").unwrap();

        let opp = store.load(&id).unwrap();
        let insights: Vec<_> = opp.interactions.iter().filter(|i| i.is_insight()).collect();
        assert_eq!(insights.len(), 1);
        assert!(insights[0].notes.as_deref().unwrap().contains("Follow up on Friday"));
    }
}
