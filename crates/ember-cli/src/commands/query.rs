use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ember::config::Config;
use ember::embedding::FastEmbedProvider;
use ember::memory::{RetrievalService, ScoredMemory, Session, SessionId};
use ember::storage::SqliteStore;

use crate::error::CliResult;
use crate::output::{OutputFormat, truncate_string};

#[derive(Parser)]
pub struct QueryCommand {
    #[clap(help = "Query text")]
    pub text: String,

    #[clap(long, default_value = "cli", help = "Session to attribute the query to")]
    pub session: String,

    #[clap(long, help = "Print the prompt block instead of a score table")]
    pub prompt: bool,
}

impl QueryCommand {
    pub async fn execute(
        &self,
        store: &SqliteStore,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        let session = Session::new(SessionId::try_from(self.session.as_str())?, &config.warmth);
        let embedder = FastEmbedProvider::new(&config.embedding)?;
        let retrieval = RetrievalService::new(
            store.clone(),
            Arc::new(embedder),
            config.scoring.clone(),
            config.retrieval.clone(),
        );

        let now = Utc::now();
        let result = retrieval.query(&self.text, &session, now).await?;

        if self.prompt {
            println!("{}", result.to_prompt_block(now).unwrap_or_default());
            return Ok(());
        }

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Table => {
                if !result.core.is_empty() {
                    println!("Core:");
                    for core in &result.core {
                        println!("  - {}", core.content);
                    }
                    println!();
                }
                print_track("Factual", &result.factual);
                print_track("Episodic", &result.episodic);
                if !result.promoted.is_empty() {
                    println!("Promoted {} memories to core", result.promoted.len());
                }
            }
        }

        Ok(())
    }
}

fn print_track(title: &str, results: &[ScoredMemory]) {
    if results.is_empty() {
        println!("{title}: no relevant memories\n");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Content", "Score", "Semantic", "Importance", "Freshness", "Warmth"]);

    for r in results {
        table.add_row([
            truncate_string(&r.memory.content, 50),
            format!("{:.3}", r.score.final_score),
            format!("{:.3}", r.score.semantic),
            format!("{:.2}", r.score.importance),
            format!("{:.3}", r.score.freshness),
            format!("{:.3}", r.score.warmth),
        ]);
    }

    println!("{title}:");
    println!("{table}\n");
}
