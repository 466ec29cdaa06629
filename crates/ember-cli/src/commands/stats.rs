use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ember::storage::SqliteStore;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn execute(&self, store: &SqliteStore, format: OutputFormat) -> CliResult<()> {
        let stats = store.stats().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            OutputFormat::Table => {
                println!("Ember Statistics");
                println!("======================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Item", "Count"]);

                table.add_row(["Sessions", &stats.sessions.to_string()]);
                table.add_row(["Turns", &stats.turns.to_string()]);
                table.add_row(["Unprocessed turns", &stats.unprocessed_turns.to_string()]);
                table.add_row(["Episodic memories", &stats.episodic_memories.to_string()]);
                table.add_row(["Factual memories", &stats.factual_memories.to_string()]);
                table.add_row(["Core memories", &stats.core_memories.to_string()]);
                table.add_row(["  promoted", &stats.promoted_memories.to_string()]);

                println!("{table}");
            }
        }

        Ok(())
    }
}
