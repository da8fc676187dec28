use clap::{Parser, Subcommand};
use eternal_memory::buffer::ConversationBuffer;
use eternal_memory::config::Config;

use crate::commands::open_memory;
use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct BufferCommand {
    #[clap(subcommand)]
    pub command: BufferSubcommand,
}

#[derive(Subcommand)]
pub enum BufferSubcommand {
    #[clap(about = "Show how full the conversation buffer is")]
    Status,

    #[clap(about = "Append a dialogue turn to the buffer")]
    Add(AddArgs),

    #[clap(about = "Commit buffered dialogue to long-term memory now")]
    Flush,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Speaker role (user, assistant)")]
    pub role: String,

    #[clap(help = "Message content")]
    pub content: String,

    #[clap(long, help = "Flush afterwards if the buffer reached its threshold")]
    pub auto_flush: bool,
}

impl BufferCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            BufferSubcommand::Status => Self::status(config, format).await,
            BufferSubcommand::Add(args) => Self::add(config, args, format).await,
            BufferSubcommand::Flush => Self::flush(config, format).await,
        }
    }

    async fn status(config: &Config, format: OutputFormat) -> CliResult<()> {
        // Log only, no store or model
        let buffer =
            ConversationBuffer::open(&config.buffer_log_path(), config.buffer.flush_threshold_tokens)
                .await?;
        let status = buffer.status();

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Table => {
                println!(
                    "{} messages, ~{} / {} tokens ({:.0}% full)",
                    status.message_count,
                    status.estimated_tokens,
                    status.threshold_tokens,
                    status.fill_percent
                );
                println!("Log: {}", buffer.log_path().display());
            }
        }

        Ok(())
    }

    async fn add(config: &Config, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let memory = open_memory(config).await?;
        memory.add_to_buffer(&args.role, &args.content).await?;

        let flushed = if args.auto_flush {
            memory.check_and_flush().await?
        } else {
            None
        };
        let status = memory.buffer_status().await;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "status": status,
                    "flushed_messages": flushed.as_ref().map(|r| r.flushed_messages),
                    "stored_items": flushed.as_ref().map(|r| r.items.len()),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if let Some(report) = &flushed {
                    println!(
                        "Flushed {} messages into {} memories",
                        report.flushed_messages,
                        report.items.len()
                    );
                }
                println!(
                    "Buffer: {} messages ({:.0}% full)",
                    status.message_count, status.fill_percent
                );
            }
        }

        Ok(())
    }

    async fn flush(config: &Config, format: OutputFormat) -> CliResult<()> {
        let memory = open_memory(config).await?;
        let report = memory.flush_buffer().await?;

        match format {
            OutputFormat::Json => {
                let items: Vec<&str> = report.items.iter().map(|i| i.content.as_str()).collect();
                let insights: Vec<&str> = report.insights.iter().map(|i| i.content.as_str()).collect();
                let advisories: Vec<String> =
                    report.advisories.iter().map(|a| a.to_string()).collect();
                let output = serde_json::json!({
                    "flushed_messages": report.flushed_messages,
                    "items": items,
                    "insights": insights,
                    "advisories": advisories,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if report.flushed_messages == 0 {
                    println!("Buffer is empty.");
                    return Ok(());
                }
                println!(
                    "Flushed {} messages into {} memories",
                    report.flushed_messages,
                    report.items.len()
                );
                for item in &report.items {
                    println!("  - {}", item.content);
                }
                if !report.insights.is_empty() {
                    println!("Profile observations:");
                    for insight in &report.insights {
                        println!("  - {} ({:.2})", insight.content, insight.confidence);
                    }
                }
                for advisory in &report.advisories {
                    println!("warning: {advisory}");
                }
            }
        }

        Ok(())
    }
}
