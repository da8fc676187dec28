use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eternal_memory::config::Config;
use eternal_memory::memory::types::JobType;

use crate::commands::{open_memory, open_store};
use crate::error::CliResult;
use crate::output::{OutputFormat, format_optional_timestamp};

#[derive(Parser)]
pub struct JobsCommand {
    #[clap(subcommand)]
    pub command: JobsSubcommand,
}

#[derive(Subcommand)]
pub enum JobsSubcommand {
    #[clap(about = "List scheduled jobs")]
    List,

    #[clap(about = "Run a job now")]
    Trigger(NameArgs),

    #[clap(about = "Enable a job")]
    Enable(NameArgs),

    #[clap(about = "Disable a job")]
    Disable(NameArgs),

    #[clap(about = "Add a custom job running a built-in job type")]
    Add(AddArgs),

    #[clap(about = "Remove a custom job")]
    Remove(NameArgs),
}

#[derive(Parser)]
pub struct NameArgs {
    #[clap(help = "Job name")]
    pub name: String,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Job name")]
    pub name: String,

    #[clap(help = "Job type, e.g. maintenance, vault_backup, daily_reflection")]
    pub job_type: String,

    #[clap(long, short, help = "Interval in seconds")]
    pub interval: u64,
}

impl JobsCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            JobsSubcommand::List => Self::list(config, format).await,
            JobsSubcommand::Trigger(args) => {
                let memory = open_memory(config).await?;
                memory.scheduler().trigger(&args.name).await?;
                println!("Job '{}' finished", args.name);
                Ok(())
            }
            JobsSubcommand::Enable(args) => Self::set_enabled(config, &args.name, true).await,
            JobsSubcommand::Disable(args) => Self::set_enabled(config, &args.name, false).await,
            JobsSubcommand::Add(args) => {
                let job_type: JobType = args.job_type.parse()?;
                let memory = open_memory(config).await?;
                memory.add_job(&args.name, job_type, args.interval).await?;
                println!(
                    "Added job '{}' ({}) every {}s",
                    args.name, job_type, args.interval
                );
                Ok(())
            }
            JobsSubcommand::Remove(args) => {
                let memory = open_memory(config).await?;
                if memory.scheduler().remove(&args.name).await? {
                    println!("Removed job '{}'", args.name);
                    Ok(())
                } else {
                    Err(format!("Job not found: {}", args.name).into())
                }
            }
        }
    }

    /// Lists the persisted task rows, so no model connection is needed
    async fn list(config: &Config, format: OutputFormat) -> CliResult<()> {
        let store = open_store(config).await?;
        let mut tasks = store.list_tasks().await?;
        tasks.sort_by(|a, b| a.name.cmp(&b.name));

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            }
            OutputFormat::Table => {
                if tasks.is_empty() {
                    println!("No jobs registered yet. Start the daemon once to create them.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Name", "Type", "Every", "Enabled", "System", "Last Run", "Next Run"]);

                for task in &tasks {
                    table.add_row([
                        task.name.clone(),
                        task.job_type.to_string(),
                        format_interval(task.interval_seconds),
                        if task.enabled { "yes" } else { "no" }.to_string(),
                        if task.is_system { "yes" } else { "no" }.to_string(),
                        format_optional_timestamp(task.last_run.as_ref()),
                        format_optional_timestamp(task.next_run.as_ref()),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn set_enabled(config: &Config, name: &str, enabled: bool) -> CliResult<()> {
        let memory = open_memory(config).await?;
        memory.scheduler().set_enabled(name, enabled).await?;
        println!("Job '{}' {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

fn format_interval(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds >= DAY && seconds % DAY == 0 {
        format!("{}d", seconds / DAY)
    } else if seconds >= HOUR && seconds % HOUR == 0 {
        format!("{}h", seconds / HOUR)
    } else if seconds >= MINUTE && seconds % MINUTE == 0 {
        format!("{}m", seconds / MINUTE)
    } else {
        format!("{seconds}s")
    }
}
