use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eternal_memory::config::Config;

use crate::commands::open_store;
use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        let store = open_store(config).await?;
        let stats = store.stats().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            OutputFormat::Table => {
                println!("Eternal Statistics");
                println!("==================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Entity", "Total", "Active"]);

                table.add_row([
                    "Memory items",
                    &stats.items.to_string(),
                    &stats.active_items.to_string(),
                ]);
                table.add_row([
                    "Semantic triples",
                    &stats.triples.to_string(),
                    &stats.active_triples.to_string(),
                ]);
                table.add_row(["Categories", &stats.categories.to_string(), "-"]);
                table.add_row(["Resources", &stats.resources.to_string(), "-"]);

                println!("{table}\n");
                println!(
                    "{} superseded items, {} awaiting triple extraction",
                    stats.superseded_items, stats.pending_triple_items
                );
                println!("Data directory: {}", config.storage.data_dir.display());
            }
        }

        Ok(())
    }
}
