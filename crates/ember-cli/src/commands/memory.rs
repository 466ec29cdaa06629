use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ember::memory::Track;
use ember::storage::SqliteStore;
use uuid::Uuid;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "List memories, newest first")]
    List(ListArgs),

    #[clap(about = "Show memory details")]
    Show(ShowArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of memories to display"
    )]
    pub limit: usize,

    #[clap(long, short, help = "Filter by track (episodic, factual)")]
    pub track: Option<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

impl MemoryCommand {
    pub async fn execute(&self, store: &SqliteStore, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::List(args) => Self::list(store, args, format).await,
            MemorySubcommand::Show(args) => Self::show(store, args, format).await,
        }
    }

    async fn list(store: &SqliteStore, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let track = args
            .track
            .as_deref()
            .map(str::parse::<Track>)
            .transpose()?;

        let memories = store.list_memories(track, args.limit).await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = memories
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "id": m.id.to_string(),
                            "track": m.track,
                            "content": &m.content,
                            "kind": m.kind,
                            "importance": m.importance,
                            "decay": m.decay_category,
                            "category": m.category,
                            "created_at": m.created_at.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if memories.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Track", "Kind", "Importance", "Decay", "Created"]);

                for memory in &memories {
                    table.add_row([
                        truncate_string(&memory.id.to_string(), 8),
                        truncate_string(&memory.content, 50),
                        memory.track.to_string(),
                        memory.kind.to_string(),
                        format!("{:.2}", memory.importance),
                        memory.decay_category.to_string(),
                        format_timestamp(&memory.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", memories.len());
            }
        }

        Ok(())
    }

    async fn show(store: &SqliteStore, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id = Uuid::parse_str(&args.id).map_err(|e| format!("Invalid UUID format: {e}"))?;

        let memory = store
            .get_memory(&id)
            .await?
            .ok_or_else(|| format!("Memory not found: {}", args.id))?;

        let session = memory
            .session_id
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let turns = memory
            .source_turns
            .map(|r| format!("{}..={}", r.first, r.last))
            .unwrap_or_else(|| "-".to_string());

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": memory.id.to_string(),
                    "track": memory.track,
                    "content": &memory.content,
                    "embedding_size": memory.embedding.len(),
                    "kind": memory.kind,
                    "importance": memory.importance,
                    "decay": memory.decay_category,
                    "category": memory.category,
                    "session_id": memory.session_id,
                    "source_turns": memory.source_turns,
                    "created_at": memory.created_at.to_rfc3339(),
                    "promoted_at": memory.promoted_at.map(|t| t.to_rfc3339()),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", &memory.id.to_string()]);
                table.add_row(["Track", &memory.track.to_string()]);
                table.add_row(["Content", &memory.content]);
                table.add_row(["Kind", &memory.kind.to_string()]);
                table.add_row(["Importance", &format!("{:.2}", memory.importance)]);
                table.add_row(["Decay", &memory.decay_category.to_string()]);
                table.add_row(["Category", &memory.category.to_string()]);
                table.add_row(["Session", &session]);
                table.add_row(["Source Turns", &turns]);
                table.add_row(["Created", &memory.created_at.to_rfc3339()]);
                table.add_row([
                    "Promoted",
                    &memory
                        .promoted_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row(["Embedding Size", &memory.embedding.len().to_string()]);

                println!("{table}");
            }
        }

        Ok(())
    }
}
