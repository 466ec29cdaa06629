use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ember::memory::CoreCategory;
use ember::storage::SqliteStore;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct CoreCommand {
    #[clap(subcommand)]
    pub command: CoreSubcommand,
}

#[derive(Subcommand)]
pub enum CoreSubcommand {
    #[clap(about = "List core memories")]
    List,

    #[clap(about = "Add a core memory")]
    Add(AddArgs),
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Core memory text")]
    pub text: String,

    #[clap(
        long,
        default_value = "fact",
        help = "Category (identity, relationship, preference, fact, narrative)"
    )]
    pub category: String,
}

impl CoreCommand {
    pub async fn execute(&self, store: &SqliteStore, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            CoreSubcommand::List => Self::list(store, format).await,
            CoreSubcommand::Add(args) => Self::add(store, args, format).await,
        }
    }

    async fn list(store: &SqliteStore, format: OutputFormat) -> CliResult<()> {
        let cores = store.list_core_memories().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&cores)?);
            }
            OutputFormat::Table => {
                if cores.is_empty() {
                    println!("No core memories.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Category", "Origin", "Created"]);

                for core in &cores {
                    table.add_row([
                        truncate_string(&core.id.to_string(), 8),
                        truncate_string(&core.content, 60),
                        core.category.to_string(),
                        core.promoted_from
                            .map(|id| format!("promoted {}", truncate_string(&id.to_string(), 8)))
                            .unwrap_or_else(|| "manual".to_string()),
                        format_timestamp(&core.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} core memories", cores.len());
            }
        }

        Ok(())
    }

    async fn add(store: &SqliteStore, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let category: CoreCategory = args.category.parse()?;
        let text = args.text.trim();
        if text.is_empty() {
            return Err("Core memory text cannot be empty".into());
        }

        let core = store.add_core_memory(category, text, Utc::now()).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&core)?);
            }
            OutputFormat::Table => {
                println!("Added core memory {} ({})", core.id, core.category);
            }
        }

        Ok(())
    }
}
