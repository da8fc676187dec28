use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eternal_memory::config::Config;
use eternal_memory::memory::types::{MemoryItem, MemoryKind};
use eternal_memory::memory::{FactInput, MemorizeReport, RetrievalMode};
use eternal_memory::storage::ItemFilter;
use uuid::Uuid;

use crate::commands::{open_memory, open_store};
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "Extract and store facts from free text")]
    Memorize(MemorizeArgs),

    #[clap(about = "Store a single fact as given")]
    Add(AddArgs),

    #[clap(about = "Retrieve memories relevant to a query")]
    Retrieve(RetrieveArgs),

    #[clap(about = "Find active memories containing a phrase")]
    Search(SearchArgs),

    #[clap(about = "List stored memories")]
    List(ListArgs),

    #[clap(about = "Show memory details")]
    Show(ShowArgs),

    #[clap(about = "Predict the context the user will need next")]
    Predict(PredictArgs),
}

#[derive(Parser)]
pub struct MemorizeArgs {
    #[clap(help = "Text to memorize")]
    pub text: String,

    #[clap(long, help = "Source URI recorded on the resource")]
    pub uri: Option<String>,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Fact content")]
    pub text: String,

    #[clap(
        long,
        short,
        default_value = "fact",
        help = "Kind of fact (fact, preference, event, plan)"
    )]
    pub kind: String,

    #[clap(long, help = "Category path, e.g. personal/health")]
    pub category: Option<String>,

    #[clap(long, help = "Importance between 0.0 and 1.0")]
    pub importance: Option<f32>,
}

#[derive(Parser)]
pub struct RetrieveArgs {
    #[clap(help = "Query text")]
    pub query: String,

    #[clap(long, short, default_value = "fast", help = "Retrieval mode (fast, deep)")]
    pub mode: String,
}

#[derive(Parser)]
pub struct SearchArgs {
    #[clap(help = "Phrase to look for (case-insensitive)")]
    pub text: String,

    #[clap(long, short, default_value = "20", help = "Maximum number of results")]
    pub limit: usize,
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

    #[clap(long, help = "Only memories in this exact category path")]
    pub category: Option<String>,

    #[clap(long, help = "Include superseded memories")]
    pub all: bool,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct PredictArgs {
    #[clap(
        long,
        default_value = "{}",
        help = "Current situation as JSON, e.g. '{\"open_apps\": [\"vscode\"]}'"
    )]
    pub context: String,
}

impl MemoryCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::Memorize(args) => Self::memorize(config, args, format).await,
            MemorySubcommand::Add(args) => Self::add(config, args, format).await,
            MemorySubcommand::Retrieve(args) => Self::retrieve(config, args, format).await,
            MemorySubcommand::Search(args) => Self::search(config, args, format).await,
            MemorySubcommand::List(args) => Self::list(config, args, format).await,
            MemorySubcommand::Show(args) => Self::show(config, args, format).await,
            MemorySubcommand::Predict(args) => Self::predict(config, args).await,
        }
    }

    async fn memorize(config: &Config, args: &MemorizeArgs, format: OutputFormat) -> CliResult<()> {
        let memory = open_memory(config).await?;
        let mut metadata = serde_json::json!({ "modality": "cli" });
        if let Some(uri) = &args.uri {
            metadata["uri"] = serde_json::Value::String(uri.clone());
        }

        let report = memory.memorize(&args.text, metadata).await?;
        print_report(&report, format)
    }

    async fn add(config: &Config, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let kind: MemoryKind = args.kind.parse()?;
        let mut fact = FactInput::new(&args.text, kind);
        if let Some(category) = &args.category {
            fact = fact.in_category(category);
        }
        if let Some(importance) = args.importance {
            fact = fact.with_importance(importance);
        }

        let memory = open_memory(config).await?;
        let report = memory.save_fact(fact).await?;
        print_report(&report, format)
    }

    async fn retrieve(config: &Config, args: &RetrieveArgs, format: OutputFormat) -> CliResult<()> {
        let mode: RetrievalMode = args.mode.parse()?;
        let memory = open_memory(config).await?;
        let result = memory.retrieve(&args.query, mode).await?;

        match format {
            OutputFormat::Json => {
                let items: Vec<_> = result
                    .items
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.item.id.to_string(),
                            "content": &r.item.content,
                            "category": &r.item.category_path,
                            "score": r.score.total,
                            "relevance": r.score.relevance,
                        })
                    })
                    .collect();
                let output = serde_json::json!({
                    "mode": result.mode,
                    "evolved_query": result.evolved_query,
                    "confidence": result.confidence,
                    "suggested_context": result.suggested_context,
                    "related_categories": result.related_categories,
                    "items": items,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if let Some(evolved) = &result.evolved_query {
                    println!("Query rewritten as: {evolved}\n");
                }

                if result.items.is_empty() {
                    println!("No memories found.");
                } else {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Score", "Relevance", "Content", "Category"]);

                    for r in &result.items {
                        table.add_row([
                            format!("{:.3}", r.score.total),
                            format!("{:.3}", r.score.relevance),
                            truncate_string(&r.item.content, 60),
                            r.item.category_path.clone(),
                        ]);
                    }
                    println!("{table}");
                }

                println!("\n{}", result.suggested_context);
                println!("Confidence: {:.2}", result.confidence);
            }
        }

        Ok(())
    }

    async fn search(config: &Config, args: &SearchArgs, format: OutputFormat) -> CliResult<()> {
        let store = open_store(config).await?;
        let items = store.text_search_items(&args.text, args.limit).await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = items.iter().map(item_json).collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("No memories mention \"{}\".", args.text);
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Category", "Importance"]);

                for item in &items {
                    table.add_row([
                        truncate_string(&item.id.to_string(), 8),
                        truncate_string(&item.content, 60),
                        item.category_path.clone(),
                        format!("{:.2}", item.importance),
                    ]);
                }
                println!("{table}");
            }
        }

        Ok(())
    }

    async fn list(config: &Config, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let store = open_store(config).await?;
        let mut filter = if args.all {
            ItemFilter::new()
        } else {
            ItemFilter::active()
        };
        if let Some(category) = &args.category {
            filter = filter.in_category(category);
        }

        let mut items = store.list_items(&filter).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(args.limit);

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = items.iter().map(item_json).collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Kind", "Category", "Importance", "Created"]);

                for item in &items {
                    let content = if item.is_active {
                        truncate_string(&item.content, 50)
                    } else {
                        format!("(superseded) {}", truncate_string(&item.content, 37))
                    };
                    table.add_row([
                        truncate_string(&item.id.to_string(), 8),
                        content,
                        item.kind.to_string(),
                        item.category_path.clone(),
                        format!("{:.2}", item.importance),
                        format_timestamp(&item.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", items.len());
            }
        }

        Ok(())
    }

    async fn show(config: &Config, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id = Uuid::parse_str(&args.id).map_err(|e| format!("Invalid UUID format: {e}"))?;

        let store = open_store(config).await?;
        let item = store
            .get_item(id)
            .await?
            .ok_or_else(|| format!("Memory not found: {}", args.id))?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&item_json(&item))?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", &item.id.to_string()]);
                table.add_row(["Content", &item.content]);
                table.add_row(["Kind", item.kind.as_str()]);
                table.add_row(["Category", &item.category_path]);
                table.add_row(["Importance", &format!("{:.4}", item.importance)]);
                table.add_row(["Confidence", &format!("{:.2}", item.confidence)]);
                table.add_row(["Mentions", &item.mention_count.to_string()]);
                table.add_row(["Active", &item.is_active.to_string()]);
                table.add_row([
                    "Superseded By",
                    &item
                        .superseded_by
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row([
                    "Resource",
                    &item
                        .resource_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row(["Created", &item.created_at.to_rfc3339()]);
                table.add_row(["Last Accessed", &item.last_accessed.to_rfc3339()]);
                table.add_row(["Embedding Size", &item.embedding.len().to_string()]);

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn predict(config: &Config, args: &PredictArgs) -> CliResult<()> {
        let context: serde_json::Value = serde_json::from_str(&args.context)?;
        let memory = open_memory(config).await?;
        println!("{}", memory.predict_context(&context).await?);
        Ok(())
    }
}

fn item_json(item: &MemoryItem) -> serde_json::Value {
    serde_json::json!({
        "id": item.id.to_string(),
        "content": &item.content,
        "kind": item.kind,
        "category": &item.category_path,
        "importance": item.importance,
        "confidence": item.confidence,
        "mention_count": item.mention_count,
        "is_active": item.is_active,
        "superseded_by": item.superseded_by.map(|id| id.to_string()),
        "created_at": item.created_at.to_rfc3339(),
        "last_accessed": item.last_accessed.to_rfc3339(),
    })
}

fn print_report(report: &MemorizeReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = report.items.iter().map(item_json).collect();
            let advisories: Vec<String> = report.advisories.iter().map(|a| a.to_string()).collect();
            let output = serde_json::json!({
                "created": report.created,
                "reinforced": report.reinforced,
                "items": items,
                "advisories": advisories,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if report.items.is_empty() {
                println!("Nothing worth remembering was found.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(["ID", "Content", "Kind", "Category", "Mentions"]);

            for item in &report.items {
                table.add_row([
                    truncate_string(&item.id.to_string(), 8),
                    truncate_string(&item.content, 50),
                    item.kind.to_string(),
                    item.category_path.clone(),
                    item.mention_count.to_string(),
                ]);
            }

            println!("{table}");
            println!(
                "\n{} new, {} reinforced",
                report.created, report.reinforced
            );
            for advisory in &report.advisories {
                println!("warning: {advisory}");
            }
        }
    }

    Ok(())
}
