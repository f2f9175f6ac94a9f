use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod eid;
mod insight;
mod legacy;
mod opportunity;
mod semantic;
mod storage;
mod store;
#[cfg(test)]
mod tests;

use cli::{Command, IndexArgs, OpportunityFields};
use config::{AppPaths, Config};
use insight::{InsightError, InsightGenerator};
use opportunity::{Interaction, Opportunity};
use semantic::{BuildOutcome, QueryFilters, SearchHit, SimilarityIndex};
use store::{Record, RecordId, RecordStore, SearchFilters};

struct App {
    config: Config,
    store: RecordStore,
    index: Arc<SimilarityIndex>,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let paths = AppPaths::from_env()?;
    tracing::debug!(base = %paths.base.display(), "using data directory");
    let config = Config::load_with(&paths.base)
        .with_context(|| format!("failed to load config from {}", paths.base.display()))?;

    let embedder = semantic::create_embedder(&config.semantic_search, &paths);
    let index = Arc::new(SimilarityIndex::open(
        embedder,
        paths.index(),
        config.semantic_search.min_score,
    ));
    let store = RecordStore::open(paths.records())
        .with_context(|| format!("failed to open {}", paths.records().display()))?
        .with_index(index.clone());

    let app = App {
        config,
        store,
        index,
    };

    run(&app, args.command)
}

fn run(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add {
            company,
            role,
            fields,
        } => {
            let mut opp = Opportunity::new(&company, &role)?;
            apply_fields(&mut opp, fields)?;
            let id = app.store.save(&opp)?;
            println!("Saved {id}");
            Ok(())
        }

        Command::List { all, json } => {
            let records: Vec<Record> = app
                .store
                .records()?
                .into_iter()
                .filter(|record| all || record.opportunity.active)
                .collect();
            print_records(&records, json)
        }

        Command::Show { id } => {
            let id = record_id(&id)?;
            let opportunity = app.store.load(&id)?;
            print_json(&Record { id, opportunity })
        }

        Command::Update {
            id,
            company,
            role,
            fields,
        } => {
            let id = record_id(&id)?;
            let mut opp = app.store.load(&id)?;
            if let Some(company) = company {
                opp.company = company.trim().to_string();
            }
            if let Some(role) = role {
                opp.role = role.trim().to_string();
            }
            apply_fields(&mut opp, fields)?;
            app.store.update(&id, &opp)?;
            println!("Updated {id}");
            Ok(())
        }

        Command::Interact {
            id,
            kind,
            method,
            notes,
            date,
        } => {
            let id = record_id(&id)?;
            let mut opp = app.store.load(&id)?;
            opp.add_interaction(
                Interaction::new(kind)
                    .with_date(date.unwrap_or_else(opportunity::now))
                    .with_method(method)
                    .with_notes(notes),
            );
            app.store.update(&id, &opp)?;
            println!("Recorded {} for {id}", kind.display_name());
            Ok(())
        }

        Command::Deactivate { id, status } => {
            let id = record_id(&id)?;
            let mut opp = app.store.load(&id)?;
            opp.deactivate(status);
            app.store.update(&id, &opp)?;
            println!("Deactivated {id}");
            Ok(())
        }

        Command::Delete { id, yes } => {
            let id = record_id(&id)?;
            if !yes && !confirm(&format!("Are you sure you want to delete {id}?"))? {
                return Ok(());
            }
            if app.store.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("Opportunity not found: {id}");
            }
            Ok(())
        }

        Command::Search {
            company,
            role,
            recruiter,
            status,
            active,
            min_interest,
            max_interest,
            from,
            to,
            count,
            json,
        } => {
            let filters = SearchFilters {
                company,
                role,
                recruiter,
                status,
                active_only: active,
                min_interest,
                max_interest,
                date_from: from,
                date_to: to,
            };
            let records = app.store.filter(&filters)?;

            if count {
                println!("{} opportunities found", records.len());
                return Ok(());
            }
            print_records(&records, json)
        }

        Command::Overdue { days } => {
            let days = days.unwrap_or(app.config.overdue_days);
            let records = app.store.overdue(days)?;
            if records.is_empty() {
                println!("No opportunities without contact for more than {days} days");
                return Ok(());
            }

            let now = opportunity::now();
            for Record { id, opportunity: opp } in records.iter() {
                let elapsed = opp.days_since_last_interaction(now).unwrap_or_default();
                println!("{id}");
                println!("  {} - {} | {elapsed} days since last contact", opp.company, opp.role);
                if let Some(next_steps) = &opp.next_steps {
                    println!("  next steps: {next_steps}");
                }
            }
            Ok(())
        }

        Command::Stats { json } => {
            let stats = app.store.statistics()?;
            if json {
                return print_json(&stats);
            }

            println!("Total opportunities: {}", stats.total);
            println!("Active: {}", stats.active);
            println!("Inactive: {}", stats.inactive);
            println!(
                "Interest level: avg {:.2}, min {}, max {}",
                stats.avg_interest, stats.min_interest, stats.max_interest
            );
            println!("Overdue: {}", stats.overdue);
            println!("By status:");
            for (status, count) in stats.by_status.iter() {
                println!("  {status}: {count}");
            }
            println!("By source:");
            for (source, count) in stats.by_source.iter() {
                println!("  {source}: {count}");
            }
            Ok(())
        }

        Command::Export { output } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "opportunities_export_{}.csv",
                    opportunity::now().format("%Y%m%d_%H%M%S")
                ))
            });
            let count = app
                .store
                .export_csv(&output)
                .with_context(|| format!("failed to export to {}", output.display()))?;
            println!("Exported {count} opportunities to {}", output.display());
            Ok(())
        }

        Command::Index { action } => run_index(app, action),

        Command::Query {
            text,
            limit,
            active,
            min_interest,
            max_interest,
            company,
        } => {
            if !index_ready(&app.index) {
                return Ok(());
            }
            let filters = QueryFilters {
                active_only: active,
                min_interest,
                max_interest,
                company,
            };
            let limit = limit.unwrap_or(app.config.semantic_search.default_limit);
            let hits = app.index.query(&app.store, &text, limit, &filters);
            print_hits(&hits);
            Ok(())
        }

        Command::Similar { id, limit } => {
            let id = record_id(&id)?;
            if !index_ready(&app.index) {
                return Ok(());
            }
            let limit = limit.unwrap_or(app.config.semantic_search.default_limit);
            let hits = app.index.similar_to(&app.store, &id, limit);
            print_hits(&hits);
            Ok(())
        }

        Command::Ask { question, limit } => {
            let limit = limit.unwrap_or(app.config.semantic_search.default_limit);
            with_insights(app, |assistant| assistant.ask(&question, limit)).map(|_| ())
        }

        Command::Review {} => {
            with_insights(app, |assistant| assistant.pipeline_review()).map(|_| ())
        }

        Command::FollowUps {} => {
            with_insights(app, |assistant| assistant.follow_up_plan()).map(|_| ())
        }

        Command::Analyze { id, save } => {
            let id = record_id(&id)?;
            let analysis = with_insights(app, |assistant| assistant.analyze(&id))?;

            if let (true, Some(text)) = (save, analysis) {
                insight::save_insight(&app.store, &id, &text)?;
                println!("\nSaved analysis to {id}");
            }
            Ok(())
        }

        Command::Email { id, recruiter } => {
            let id = record_id(&id)?;
            with_insights(app, |assistant| {
                assistant.follow_up_email(&id, recruiter.as_deref())
            })
            .map(|_| ())
        }

        Command::ImportLegacy { dir } => {
            let report = legacy::import_dir(&app.store, &dir)
                .with_context(|| format!("failed to read {}", dir.display()))?;

            println!("Imported {} opportunities", report.imported.len());
            if !report.failed.is_empty() {
                println!("Failed to import {} files:", report.failed.len());
                for (path, reason) in report.failed.iter() {
                    println!("  {}: {reason}", path.display());
                }
            }
            Ok(())
        }
    }
}

fn run_index(app: &App, action: IndexArgs) -> anyhow::Result<()> {
    match action {
        IndexArgs::Build {} => {
            match app.index.build(&app.store)? {
                BuildOutcome::Built { documents } => {
                    println!("Indexed {documents} opportunities")
                }
                BuildOutcome::NoRecords => println!("No opportunities to index"),
                BuildOutcome::Unavailable(reason) => {
                    println!("Similarity search unavailable: {reason}")
                }
            }
            Ok(())
        }

        IndexArgs::Status {} => {
            let stats = app.index.stats();
            println!("Status: {}", stats.status);
            println!("Documents: {}", stats.document_count);
            println!("Location: {}", stats.location.display());
            println!("Model: {}", stats.model);
            if let Some(reason) = app.index.unavailable_reason() {
                println!("Provider unavailable: {reason}");
            }
            Ok(())
        }

        IndexArgs::Delete { yes } => {
            if !yes && !confirm("Delete the similarity index? It can be rebuilt later.")? {
                return Ok(());
            }
            app.index.delete()?;
            println!("Similarity index deleted");
            Ok(())
        }
    }
}

fn record_id(raw: &str) -> anyhow::Result<RecordId> {
    RecordId::parse(raw).with_context(|| format!("invalid opportunity identifier: {raw:?}"))
}

fn confirm(message: &str) -> anyhow::Result<bool> {
    match inquire::prompt_confirmation(message) {
        InquireResult::Ok(answer) => Ok(answer),
        InquireResult::Err(err) => bail!("An error occurred: {}", err),
    }
}

/// Empty input clears an optional field.
fn set_text(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value).filter(|v| !v.trim().is_empty());
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn apply_fields(opp: &mut Opportunity, fields: OpportunityFields) -> anyhow::Result<()> {
    opp.set_recruiter(fields.recruiter, fields.contact)?;
    if let Some(level) = fields.interest {
        opp.set_interest_level(level)?;
    }

    set_text(&mut opp.notes, fields.notes);
    set_text(&mut opp.next_steps, fields.next_steps);
    set_text(&mut opp.source, fields.source);
    set_text(&mut opp.company_link, fields.link);
    set_text(&mut opp.status, fields.status);
    set_text(&mut opp.job_description, fields.job_description);

    if let Some(path) = fields.job_description_file {
        opp.job_description = Some(read_text(&path)?);
    }
    if let Some(path) = fields.resume_file {
        opp.resume_text = Some(read_text(&path)?);
    }
    if let Some(path) = fields.cover_letter_file {
        opp.cover_letter_text = Some(read_text(&path)?);
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_records(records: &[Record], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No opportunities found");
        return Ok(());
    }

    for Record { id, opportunity: opp } in records {
        let state = match (&opp.status, opp.active) {
            (Some(status), _) => status.as_str(),
            (None, true) => "active",
            (None, false) => "inactive",
        };
        let last_contact = opp
            .latest_interaction()
            .map(|i| i.date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!("{id}");
        println!(
            "  {} - {} | interest {}/5 | {state} | last contact {last_contact}",
            opp.company, opp.role, opp.interest_level
        );
    }
    Ok(())
}

fn index_ready(index: &SimilarityIndex) -> bool {
    if index.is_available() {
        return true;
    }
    match index.unavailable_reason() {
        Some(reason) => println!("Similarity search unavailable: {reason}"),
        None => println!("No similarity index found. Run `jobtrack index build` first."),
    }
    false
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No similar opportunities found");
        return;
    }
    for SearchHit { record, score } in hits {
        let opp = &record.opportunity;
        println!(
            "{score:.3}  {}  {} - {} (interest {}/5)",
            record.id, opp.company, opp.role, opp.interest_level
        );
    }
}

/// Runs one assistant operation and prints its answer.
/// An unusable provider is reported as a notice, not an error.
fn with_insights(
    app: &App,
    operation: impl FnOnce(&InsightGenerator) -> Result<String, InsightError>,
) -> anyhow::Result<Option<String>> {
    let provider = insight::create_provider(&app.config.insights);
    log::info!("using completion model {}", provider.model_name());
    let assistant = InsightGenerator::new(
        &app.store,
        Some(app.index.as_ref()),
        provider.as_ref(),
        app.config.overdue_days,
    );

    match operation(&assistant) {
        Ok(text) => {
            println!("{text}");
            Ok(Some(text))
        }
        Err(InsightError::Unavailable(reason)) => {
            println!("AI assistant unavailable: {reason}");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
