use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::opportunity::{timestamp, ContactMethod, InteractionType};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log progress to stderr. RUST_LOG overrides this.
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Scalar fields shared by `add` and `update`.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct OpportunityFields {
    /// Recruiter name
    #[clap(long)]
    pub recruiter: Option<String>,

    /// Recruiter email or phone number
    #[clap(long)]
    pub contact: Option<String>,

    /// Interest level from 1 (very low) to 5 (very high)
    #[clap(short, long, allow_negative_numbers = true)]
    pub interest: Option<i64>,

    #[clap(short, long)]
    pub notes: Option<String>,

    #[clap(long)]
    pub next_steps: Option<String>,

    /// Where the opportunity came from (e.g. linkedin, referral)
    #[clap(short, long)]
    pub source: Option<String>,

    /// Link to the job posting or company page
    #[clap(long)]
    pub link: Option<String>,

    /// Free-form status label
    #[clap(long)]
    pub status: Option<String>,

    /// Job description text
    #[clap(long, conflicts_with = "job_description_file")]
    pub job_description: Option<String>,

    /// Read the job description from a file
    #[clap(long)]
    pub job_description_file: Option<PathBuf>,

    /// Read the resume sent for this application from a file
    #[clap(long)]
    pub resume_file: Option<PathBuf>,

    /// Read the cover letter sent for this application from a file
    #[clap(long)]
    pub cover_letter_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IndexArgs {
    /// Rebuild the similarity index from every record
    Build {},
    /// Show index status and document count
    Status {},
    /// Remove the persisted index
    Delete {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a new opportunity
    Add {
        company: String,

        role: String,

        #[clap(flatten)]
        fields: OpportunityFields,
    },
    /// List opportunities, newest first
    List {
        /// Include inactive opportunities
        #[clap(short, long, default_value = "false")]
        all: bool,

        /// Print as json
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Print one opportunity as json
    Show {
        /// Record identifier, file name or path
        id: String,
    },
    /// Change fields of an opportunity
    Update {
        id: String,

        #[clap(long)]
        company: Option<String>,

        #[clap(long)]
        role: Option<String>,

        #[clap(flatten)]
        fields: OpportunityFields,
    },
    /// Append an interaction to an opportunity
    Interact {
        id: String,

        /// initial_contact, follow_up, interview_screen, interview_technical,
        /// interview_final, rejection, offer or other
        #[clap(short = 't', long = "type")]
        kind: InteractionType,

        /// recruiter_email, recruiter_call, inbound_application,
        /// linkedin_message or referral
        #[clap(short, long)]
        method: Option<ContactMethod>,

        #[clap(short, long)]
        notes: Option<String>,

        /// When it happened (defaults to now), e.g. "2024-03-02 10:15"
        #[clap(short, long, value_parser = parse_date_start)]
        date: Option<NaiveDateTime>,
    },
    /// Mark an opportunity inactive
    Deactivate {
        id: String,

        /// Status label, e.g. rejected or withdrawn
        #[clap(short, long)]
        status: Option<String>,
    },
    /// Delete an opportunity
    Delete {
        id: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
    /// Filter opportunities by field
    Search {
        /// Company name contains
        #[clap(short, long)]
        company: Option<String>,

        /// Role contains
        #[clap(short, long)]
        role: Option<String>,

        /// Recruiter name contains
        #[clap(long)]
        recruiter: Option<String>,

        /// Status equals
        #[clap(long)]
        status: Option<String>,

        /// Only active opportunities
        #[clap(short, long, default_value = "false")]
        active: bool,

        #[clap(long)]
        min_interest: Option<u8>,

        #[clap(long)]
        max_interest: Option<u8>,

        /// Created on or after this date
        #[clap(long, value_parser = parse_date_start)]
        from: Option<NaiveDateTime>,

        /// Created on or before this date
        #[clap(long, value_parser = parse_date_end)]
        to: Option<NaiveDateTime>,

        /// Print the count
        #[clap(long, default_value = "false")]
        count: bool,

        /// Print as json
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Active opportunities with no contact for a while
    Overdue {
        /// Days without contact (defaults to overdue_days from config)
        #[clap(short, long)]
        days: Option<i64>,
    },
    /// Aggregate statistics
    Stats {
        /// Print as json
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Write key fields of every opportunity to a CSV file
    Export {
        /// Destination file (defaults to a timestamped name in the current directory)
        output: Option<PathBuf>,
    },
    /// Manage the similarity index
    Index {
        #[clap(subcommand)]
        action: IndexArgs,
    },
    /// Find opportunities similar to a piece of text
    Query {
        text: String,

        /// Number of results
        #[clap(short = 'k', long)]
        limit: Option<usize>,

        /// Only active opportunities
        #[clap(short, long, default_value = "false")]
        active: bool,

        #[clap(long)]
        min_interest: Option<u8>,

        #[clap(long)]
        max_interest: Option<u8>,

        /// Company name contains
        #[clap(short, long)]
        company: Option<String>,
    },
    /// Find opportunities similar to an existing one
    Similar {
        id: String,

        /// Number of results
        #[clap(short = 'k', long)]
        limit: Option<usize>,
    },
    /// Ask the assistant a question about your search
    Ask {
        question: String,

        /// Number of opportunities given as context
        #[clap(short = 'k', long)]
        limit: Option<usize>,
    },
    /// Assistant review of the whole pipeline
    Review {},
    /// Assistant plan for overdue follow-ups
    FollowUps {},
    /// Assistant analysis of one opportunity
    Analyze {
        id: String,

        /// Store the analysis on the opportunity as an insight
        #[clap(long, default_value = "false")]
        save: bool,
    },
    /// Draft a follow-up email for an opportunity
    Email {
        id: String,

        /// Address the email to this name instead of the stored recruiter
        #[clap(long)]
        recruiter: Option<String>,
    },
    /// Import records written by older versions
    ImportLegacy {
        /// Directory holding the old json files
        dir: PathBuf,
    },
}

fn parse_date(raw: &str) -> Result<NaiveDateTime, String> {
    timestamp::parse(raw).ok_or_else(|| format!("invalid date '{raw}' (expected YYYY-MM-DD [HH:MM])"))
}

pub fn parse_date_start(raw: &str) -> Result<NaiveDateTime, String> {
    parse_date(raw)
}

/// A bare date means the whole day.
pub fn parse_date_end(raw: &str) -> Result<NaiveDateTime, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        if let Some(end) = date.and_hms_micro_opt(23, 59, 59, 999_999) {
            return Ok(end);
        }
    }
    parse_date(raw)
}
