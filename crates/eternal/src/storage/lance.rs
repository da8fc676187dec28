use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::OptimizeAction;
use lancedb::{DistanceType, Table};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EternalError, Result};
use crate::memory::scoring::cosine_similarity;
use crate::memory::types::{
    Category, JobType, MemoryItem, MemoryKind, Resource, ScheduledTask, SemanticTriple,
};
use crate::storage::filter::{ItemFilter, id_list_clause, quote};

const RESOURCES_TABLE: &str = "resources";
const CATEGORIES_TABLE: &str = "categories";
const ITEMS_TABLE: &str = "memory_items";
const TRIPLES_TABLE: &str = "semantic_triples";
const TASKS_TABLE: &str = "scheduled_tasks";

/// Row counts across the store
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub resources: usize,
    pub categories: usize,
    pub items: usize,
    pub active_items: usize,
    pub superseded_items: usize,
    pub triples: usize,
    pub active_triples: usize,
    pub pending_triple_items: usize,
}

/// LanceDB-backed memory store.
///
/// All tables are opened (or created) once in [`LanceStore::open`], so the
/// store can be shared as `Arc<LanceStore>` and every method takes `&self`.
/// Mutations are narrow `only_if` updates keyed by id.
pub struct LanceStore {
    dimension: i32,
    resources: Table,
    categories: Table,
    items: Table,
    triples: Table,
    tasks: Table,
}

impl LanceStore {
    /// Connect to the database at `path`, creating any missing table.
    ///
    /// Fails with a configuration error if an existing items table was
    /// created with a different embedding dimension.
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            EternalError::Storage(format!(
                "Failed to create data directory {}: {e}",
                path.display()
            ))
        })?;

        let uri = path
            .to_str()
            .ok_or_else(|| EternalError::Storage("Invalid path encoding".to_string()))?;

        let dimension = i32::try_from(dimension)
            .map_err(|_| EternalError::Config(format!("Embedding dimension {dimension} too large")))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        let existing = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to list tables: {e}")))?;

        let resources =
            open_or_create(&connection, &existing, RESOURCES_TABLE, resources_schema()).await?;
        let categories = open_or_create(
            &connection,
            &existing,
            CATEGORIES_TABLE,
            categories_schema(dimension),
        )
        .await?;
        let items =
            open_or_create(&connection, &existing, ITEMS_TABLE, items_schema(dimension)).await?;
        let triples =
            open_or_create(&connection, &existing, TRIPLES_TABLE, triples_schema(dimension))
                .await?;
        let tasks = open_or_create(&connection, &existing, TASKS_TABLE, tasks_schema()).await?;

        let store = Self {
            dimension,
            resources,
            categories,
            items,
            triples,
            tasks,
        };
        store.check_dimension().await?;
        Ok(store)
    }

    async fn check_dimension(&self) -> Result<()> {
        let schema = self
            .items
            .schema()
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to read schema: {e}")))?;
        let field = schema
            .field_with_name("embedding")
            .map_err(|e| EternalError::Storage(format!("Missing embedding column: {e}")))?;
        match field.data_type() {
            DataType::FixedSizeList(_, size) if *size == self.dimension => Ok(()),
            DataType::FixedSizeList(_, size) => Err(EternalError::Config(format!(
                "Store was created with {size}-dimensional embeddings, config says {}",
                self.dimension
            ))),
            other => Err(EternalError::Storage(format!(
                "Unexpected embedding column type: {other}"
            ))),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    /// Record an immutable raw input
    pub async fn insert_resource(&self, resource: &Resource) -> Result<()> {
        let schema = resources_schema();
        let metadata = serde_json::to_string(&resource.metadata)?;
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![resource.id.to_string()])),
                Arc::new(StringArray::from(vec![resource.uri.as_str()])),
                Arc::new(StringArray::from(vec![resource.modality.as_str()])),
                Arc::new(StringArray::from(vec![resource.content.as_str()])),
                Arc::new(StringArray::from(vec![metadata])),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![resource.created_at.timestamp_micros()])
                        .with_timezone("UTC"),
                ),
            ],
        )
        .map_err(|e| EternalError::Storage(format!("Failed to create resource batch: {e}")))?;

        add_batch(&self.resources, schema, batch, "resource").await
    }

    pub async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>> {
        let batches =
            collect(self.resources.query().only_if(format!("id = '{id}'")), "resource").await?;
        let mut resources = Vec::new();
        for batch in &batches {
            let ids = column::<StringArray>(batch, "id")?;
            let uris = column::<StringArray>(batch, "uri")?;
            let modalities = column::<StringArray>(batch, "modality")?;
            let contents = column::<StringArray>(batch, "content")?;
            let metadata = column::<StringArray>(batch, "metadata")?;
            let created = column::<TimestampMicrosecondArray>(batch, "created_at")?;
            for row in 0..batch.num_rows() {
                resources.push(Resource {
                    id: parse_uuid(ids.value(row))?,
                    uri: uris.value(row).to_string(),
                    modality: modalities.value(row).to_string(),
                    content: contents.value(row).to_string(),
                    metadata: serde_json::from_str(metadata.value(row))?,
                    created_at: timestamp(created, row)?,
                });
            }
        }
        Ok(resources.into_iter().next())
    }

    // ---------------------------------------------------------------------
    // Categories
    // ---------------------------------------------------------------------

    pub async fn insert_categories(&self, categories: &[Category]) -> Result<()> {
        if categories.is_empty() {
            return Ok(());
        }
        let schema = categories_schema(self.dimension);
        let embeddings: Vec<&[f32]> = categories.iter().map(|c| c.embedding.as_slice()).collect();

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(
                    categories.iter().map(|c| c.id.to_string()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories.iter().map(|c| c.path.as_str()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories
                        .iter()
                        .map(|c| c.parent_id.map(|p| p.to_string()))
                        .collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories.iter().map(|c| c.summary.clone()).collect::<Vec<_>>(),
                )),
                Arc::new(BooleanArray::from(
                    categories
                        .iter()
                        .map(|c| c.needs_reorganization)
                        .collect::<Vec<_>>(),
                )),
                Arc::new(
                    TimestampMicrosecondArray::from(
                        categories
                            .iter()
                            .map(|c| c.last_accessed.timestamp_micros())
                            .collect::<Vec<_>>(),
                    )
                    .with_timezone("UTC"),
                ),
                Arc::new(embedding_array(&embeddings, self.dimension)?),
            ],
        )
        .map_err(|e| EternalError::Storage(format!("Failed to create category batch: {e}")))?;

        add_batch(&self.categories, schema, batch, "categories").await
    }

    pub async fn get_category_by_path(&self, path: &str) -> Result<Option<Category>> {
        let batches = collect(
            self.categories
                .query()
                .only_if(format!("path = {}", quote(path))),
            "category",
        )
        .await?;
        Ok(categories_from_batches(&batches)?.into_iter().next())
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let batches = collect(self.categories.query(), "categories").await?;
        let mut categories = categories_from_batches(&batches)?;
        categories.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(categories)
    }

    /// Nearest categories by name embedding, with cosine similarity
    pub async fn search_categories(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(Category, f32)>> {
        let batches =
            vector_search(&self.categories, "embedding", embedding, None, limit).await?;
        let mut scored: Vec<(Category, f32)> = categories_from_batches(&batches)?
            .into_iter()
            .map(|c| {
                let similarity = cosine_similarity(embedding, &c.embedding);
                (c, similarity)
            })
            .collect();
        sort_by_similarity(&mut scored);
        Ok(scored)
    }

    pub async fn update_category_summary(&self, id: Uuid, summary: &str) -> Result<()> {
        let now = Utc::now().timestamp_micros();
        update(
            &self.categories,
            format!("id = '{id}'"),
            vec![
                ("summary", quote(summary)),
                ("last_accessed", format!("{now}")),
            ],
            "category summary",
        )
        .await?;
        Ok(())
    }

    pub async fn set_category_reorganization(&self, id: Uuid, flagged: bool) -> Result<()> {
        update(
            &self.categories,
            format!("id = '{id}'"),
            vec![("needs_reorganization", flagged.to_string())],
            "category flag",
        )
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Memory items
    // ---------------------------------------------------------------------

    pub async fn insert_item(&self, item: &MemoryItem) -> Result<()> {
        self.insert_items(std::slice::from_ref(item)).await
    }

    pub async fn insert_items(&self, items: &[MemoryItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let schema = items_schema(self.dimension);
        let batch = items_to_batch(items, schema.clone(), self.dimension)?;
        add_batch(&self.items, schema, batch, "memory items").await
    }

    pub async fn get_item(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        let batches =
            collect(self.items.query().only_if(format!("id = '{id}'")), "memory item").await?;
        Ok(items_from_batches(&batches)?.into_iter().next())
    }

    /// All items matching `filter`, in store order
    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<MemoryItem>> {
        let mut query = self.items.query();
        if let Some(clause) = filter.to_sql_clause() {
            query = query.only_if(clause);
        }
        let batches = collect(query, "memory items").await?;
        items_from_batches(&batches)
    }

    /// Most recently accessed items first
    pub async fn recent_items(&self, filter: &ItemFilter, limit: usize) -> Result<Vec<MemoryItem>> {
        let mut items = self.list_items(filter).await?;
        items.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        items.truncate(limit);
        Ok(items)
    }

    /// Nearest items by embedding with exact cosine similarity, best first
    pub async fn search_items(
        &self,
        embedding: &[f32],
        filter: &ItemFilter,
        limit: usize,
    ) -> Result<Vec<(MemoryItem, f32)>> {
        let batches = vector_search(
            &self.items,
            "embedding",
            embedding,
            filter.to_sql_clause(),
            limit,
        )
        .await?;
        let mut scored: Vec<(MemoryItem, f32)> = items_from_batches(&batches)?
            .into_iter()
            .map(|item| {
                let similarity = cosine_similarity(embedding, &item.embedding);
                (item, similarity)
            })
            .collect();
        sort_by_similarity(&mut scored);
        Ok(scored)
    }

    /// Case-insensitive substring search over item content
    pub async fn text_search_items(&self, text: &str, limit: usize) -> Result<Vec<MemoryItem>> {
        let pattern = format!("%{}%", text.to_lowercase());
        let batches = collect(
            self.items
                .query()
                .only_if(format!(
                    "is_active = true AND lower(content) LIKE {}",
                    quote(&pattern)
                ))
                .limit(limit),
            "text search",
        )
        .await?;
        items_from_batches(&batches)
    }

    pub async fn count_items(&self, filter: &ItemFilter) -> Result<usize> {
        self.items
            .count_rows(filter.to_sql_clause())
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to count items: {e}")))
    }

    /// Persist a reinforcement computed by [`MemoryItem::reinforce`]
    pub async fn reinforce_item(&self, item: &MemoryItem) -> Result<()> {
        update(
            &self.items,
            format!("id = '{}'", item.id),
            vec![
                ("importance", format!("{}", item.importance)),
                ("mention_count", item.mention_count.to_string()),
                (
                    "last_accessed",
                    format!("{}", item.last_accessed.timestamp_micros()),
                ),
            ],
            "reinforcement",
        )
        .await?;
        Ok(())
    }

    /// Refresh `last_accessed` for retrieved items
    pub async fn touch_items(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        update(
            &self.items,
            id_list_clause("id", ids),
            vec![("last_accessed", format!("{}", at.timestamp_micros()))],
            "access time",
        )
        .await?;
        Ok(())
    }

    /// Mark an active item as replaced by `by`.
    ///
    /// Returns false when the item was already inactive (or missing); an
    /// inactive item is never touched again.
    pub async fn supersede_item(&self, id: Uuid, by: Uuid) -> Result<bool> {
        if id == by {
            return Err(EternalError::Memory(format!(
                "Item {id} cannot supersede itself"
            )));
        }
        let rows = update(
            &self.items,
            format!("id = '{id}' AND is_active = true"),
            vec![("is_active", "false".to_string()), ("superseded_by", format!("'{by}'"))],
            "supersession",
        )
        .await?;
        Ok(rows > 0)
    }

    pub async fn set_triples_pending(&self, id: Uuid, pending: bool) -> Result<()> {
        update(
            &self.items,
            format!("id = '{id}'"),
            vec![("triples_pending", pending.to_string())],
            "triple flag",
        )
        .await?;
        Ok(())
    }

    /// Hard-delete items by id. Only the opt-in archival step calls this.
    pub async fn delete_items(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.items
            .delete(&id_list_clause("id", ids))
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to delete items: {e}")))?;
        Ok(ids.len())
    }

    // ---------------------------------------------------------------------
    // Semantic triples
    // ---------------------------------------------------------------------

    pub async fn insert_triples(&self, triples: &[SemanticTriple]) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        let schema = triples_schema(self.dimension);
        let batch = triples_to_batch(triples, schema.clone(), self.dimension)?;
        add_batch(&self.triples, schema, batch, "triples").await
    }

    /// Search triples by subject and object embeddings.
    ///
    /// Results from both columns are merged per triple keeping the higher
    /// similarity. Inactive triples are included so callers can tell a
    /// superseded fact apart from an unknown one.
    pub async fn search_triples(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(SemanticTriple, f32)>> {
        let mut merged: HashMap<Uuid, (SemanticTriple, f32)> = HashMap::new();

        for column_name in ["subject_embedding", "object_embedding"] {
            let batches =
                vector_search(&self.triples, column_name, embedding, None, limit).await?;
            for triple in triples_from_batches(&batches)? {
                let similarity = cosine_similarity(embedding, &triple.subject_embedding)
                    .max(cosine_similarity(embedding, &triple.object_embedding));
                merged
                    .entry(triple.id)
                    .and_modify(|entry| entry.1 = entry.1.max(similarity))
                    .or_insert((triple, similarity));
            }
        }

        let mut scored: Vec<(SemanticTriple, f32)> = merged.into_values().collect();
        sort_by_similarity(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    /// Active triples whose subject matches case-insensitively
    pub async fn active_triples_for_subject(&self, subject: &str) -> Result<Vec<SemanticTriple>> {
        let batches = collect(
            self.triples.query().only_if(format!(
                "is_active = true AND lower(subject) = {}",
                quote(&subject.to_lowercase())
            )),
            "triples",
        )
        .await?;
        triples_from_batches(&batches)
    }

    pub async fn supersede_triple(&self, id: Uuid, by: Uuid) -> Result<bool> {
        if id == by {
            return Err(EternalError::Memory(format!(
                "Triple {id} cannot supersede itself"
            )));
        }
        let rows = update(
            &self.triples,
            format!("id = '{id}' AND is_active = true"),
            vec![("is_active", "false".to_string()), ("superseded_by", format!("'{by}'"))],
            "triple supersession",
        )
        .await?;
        Ok(rows > 0)
    }

    // ---------------------------------------------------------------------
    // Scheduled tasks
    // ---------------------------------------------------------------------

    /// Insert a task, or update the existing row with the same name
    pub async fn upsert_task(&self, task: &ScheduledTask) -> Result<()> {
        let interval = i64::try_from(task.interval_seconds).map_err(|_| {
            EternalError::Scheduler(format!(
                "Interval of {}s for job '{}' is out of range",
                task.interval_seconds, task.name
            ))
        })?;
        if self.get_task(&task.name).await?.is_some() {
            let micros = |t: Option<DateTime<Utc>>| {
                t.map(|t| t.timestamp_micros().to_string())
                    .unwrap_or_else(|| "NULL".to_string())
            };
            update(
                &self.tasks,
                format!("name = {}", quote(&task.name)),
                vec![
                    ("job_type", quote(task.job_type.as_str())),
                    ("interval_seconds", interval.to_string()),
                    ("enabled", task.enabled.to_string()),
                    ("is_system", task.is_system.to_string()),
                    ("last_run", micros(task.last_run)),
                    ("next_run", micros(task.next_run)),
                ],
                "scheduled task",
            )
            .await?;
            return Ok(());
        }

        let schema = tasks_schema();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![task.id.to_string()])),
                Arc::new(StringArray::from(vec![task.name.as_str()])),
                Arc::new(StringArray::from(vec![task.job_type.as_str()])),
                Arc::new(Int64Array::from(vec![interval])),
                Arc::new(BooleanArray::from(vec![task.enabled])),
                Arc::new(BooleanArray::from(vec![task.is_system])),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![
                        task.last_run.map(|t| t.timestamp_micros()),
                    ])
                    .with_timezone("UTC"),
                ),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![
                        task.next_run.map(|t| t.timestamp_micros()),
                    ])
                    .with_timezone("UTC"),
                ),
            ],
        )
        .map_err(|e| EternalError::Storage(format!("Failed to create task batch: {e}")))?;

        add_batch(&self.tasks, schema, batch, "scheduled task").await
    }

    pub async fn get_task(&self, name: &str) -> Result<Option<ScheduledTask>> {
        let batches = collect(
            self.tasks.query().only_if(format!("name = {}", quote(name))),
            "scheduled task",
        )
        .await?;
        Ok(tasks_from_batches(&batches)?.into_iter().next())
    }

    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let batches = collect(self.tasks.query(), "scheduled tasks").await?;
        tasks_from_batches(&batches)
    }

    pub async fn delete_task(&self, name: &str) -> Result<()> {
        self.tasks
            .delete(&format!("name = {}", quote(name)))
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to delete task: {e}")))?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------------

    /// Compact files and refresh indices on every table
    pub async fn optimize(&self) -> Result<()> {
        for (name, table) in [
            (RESOURCES_TABLE, &self.resources),
            (CATEGORIES_TABLE, &self.categories),
            (ITEMS_TABLE, &self.items),
            (TRIPLES_TABLE, &self.triples),
            (TASKS_TABLE, &self.tasks),
        ] {
            table
                .optimize(OptimizeAction::All)
                .await
                .map_err(|e| EternalError::Storage(format!("Failed to optimize {name}: {e}")))?;
            debug!(table = name, "Optimized table");
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let count = |table: &Table, filter: Option<String>| {
            let table = table.clone();
            async move {
                table
                    .count_rows(filter)
                    .await
                    .map_err(|e| EternalError::Storage(format!("Failed to count rows: {e}")))
            }
        };

        Ok(StoreStats {
            resources: count(&self.resources, None).await?,
            categories: count(&self.categories, None).await?,
            items: count(&self.items, None).await?,
            active_items: count(&self.items, Some("is_active = true".into())).await?,
            superseded_items: count(&self.items, Some("superseded_by IS NOT NULL".into())).await?,
            triples: count(&self.triples, None).await?,
            active_triples: count(&self.triples, Some("is_active = true".into())).await?,
            pending_triple_items: count(&self.items, Some("triples_pending = true".into()))
                .await?,
        })
    }
}

// -------------------------------------------------------------------------
// Schemas
// -------------------------------------------------------------------------

fn timestamp_field(name: &str, nullable: bool) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        nullable,
    )
}

fn embedding_field(name: &str, dimension: i32) -> Field {
    Field::new(
        name,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension,
        ),
        false,
    )
}

fn resources_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("uri", DataType::Utf8, false),
        Field::new("modality", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        timestamp_field("created_at", false),
    ]))
}

fn categories_schema(dimension: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("parent_id", DataType::Utf8, true),
        Field::new("summary", DataType::Utf8, true),
        Field::new("needs_reorganization", DataType::Boolean, false),
        timestamp_field("last_accessed", false),
        embedding_field("embedding", dimension),
    ]))
}

fn items_schema(dimension: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("category_id", DataType::Utf8, true),
        Field::new("category_path", DataType::Utf8, false),
        Field::new("resource_id", DataType::Utf8, true),
        Field::new("kind", DataType::Utf8, false),
        Field::new("confidence", DataType::Float32, false),
        Field::new("importance", DataType::Float32, false),
        Field::new("mention_count", DataType::Int32, false),
        Field::new("is_active", DataType::Boolean, false),
        Field::new("superseded_by", DataType::Utf8, true),
        Field::new("triples_pending", DataType::Boolean, false),
        timestamp_field("created_at", false),
        timestamp_field("last_accessed", false),
        embedding_field("embedding", dimension),
    ]))
}

fn triples_schema(dimension: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("memory_item_id", DataType::Utf8, true),
        Field::new("subject", DataType::Utf8, false),
        Field::new("predicate", DataType::Utf8, false),
        Field::new("object", DataType::Utf8, false),
        Field::new("context", DataType::Utf8, true),
        Field::new("importance", DataType::Float32, false),
        Field::new("confidence", DataType::Float32, false),
        Field::new("is_active", DataType::Boolean, false),
        Field::new("superseded_by", DataType::Utf8, true),
        timestamp_field("created_at", false),
        timestamp_field("last_accessed", false),
        embedding_field("subject_embedding", dimension),
        embedding_field("object_embedding", dimension),
    ]))
}

fn tasks_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("job_type", DataType::Utf8, false),
        Field::new("interval_seconds", DataType::Int64, false),
        Field::new("enabled", DataType::Boolean, false),
        Field::new("is_system", DataType::Boolean, false),
        timestamp_field("last_run", true),
        timestamp_field("next_run", true),
    ]))
}

// -------------------------------------------------------------------------
// Table helpers
// -------------------------------------------------------------------------

async fn open_or_create(
    connection: &Connection,
    existing: &[String],
    name: &str,
    schema: SchemaRef,
) -> Result<Table> {
    if existing.iter().any(|n| n == name) {
        debug!(table = name, "Opening existing table");
        connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to open {name} table: {e}")))
    } else {
        info!(table = name, "Creating table");
        connection
            .create_empty_table(name, schema)
            .execute()
            .await
            .map_err(|e| EternalError::Storage(format!("Failed to create {name} table: {e}")))
    }
}

async fn add_batch(table: &Table, schema: SchemaRef, batch: RecordBatch, what: &str) -> Result<()> {
    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
    table
        .add(Box::new(batches))
        .execute()
        .await
        .map_err(|e| EternalError::Storage(format!("Failed to insert {what}: {e}")))?;
    Ok(())
}

async fn update(
    table: &Table,
    filter: String,
    columns: Vec<(&str, String)>,
    what: &str,
) -> Result<u64> {
    let mut builder = table.update().only_if(filter);
    for (name, expr) in columns {
        builder = builder.column(name, expr);
    }
    let result = builder
        .execute()
        .await
        .map_err(|e| EternalError::Storage(format!("Failed to update {what}: {e}")))?;
    Ok(result.rows_updated)
}

async fn collect<Q: ExecutableQuery>(query: Q, what: &str) -> Result<Vec<RecordBatch>> {
    let stream = query
        .execute()
        .await
        .map_err(|e| EternalError::Storage(format!("Failed to query {what}: {e}")))?;
    stream
        .try_collect()
        .await
        .map_err(|e| EternalError::Storage(format!("Failed to collect {what}: {e}")))
}

/// Cosine nearest-neighbour search over one vector column.
///
/// Returns nothing without querying when no row passes the filter.
async fn vector_search(
    table: &Table,
    column_name: &str,
    embedding: &[f32],
    filter: Option<String>,
    limit: usize,
) -> Result<Vec<RecordBatch>> {
    let candidates = table
        .count_rows(filter.clone())
        .await
        .map_err(|e| EternalError::Storage(format!("Failed to count rows: {e}")))?;
    if candidates == 0 || limit == 0 {
        return Ok(Vec::new());
    }

    let mut query = table
        .query()
        .nearest_to(embedding)
        .map_err(|e| EternalError::Storage(format!("Failed to create vector query: {e}")))?
        .column(column_name)
        .distance_type(DistanceType::Cosine)
        .limit(limit);
    if let Some(clause) = filter {
        query = query.only_if(clause);
    }
    collect(query, "vector search").await
}

fn sort_by_similarity<T>(scored: &mut [(T, f32)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

// -------------------------------------------------------------------------
// Column helpers
// -------------------------------------------------------------------------

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| EternalError::Storage(format!("Failed to get {name} column")))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| EternalError::Storage(format!("Failed to parse UUID: {e}")))
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) || array.value(row).is_empty() {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

fn optional_uuid(array: &StringArray, row: usize) -> Result<Option<Uuid>> {
    optional_string(array, row)
        .map(|s| parse_uuid(&s))
        .transpose()
}

fn timestamp(array: &TimestampMicrosecondArray, row: usize) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(array.value(row))
        .single()
        .ok_or_else(|| EternalError::Storage("Failed to parse timestamp".to_string()))
}

fn optional_timestamp(array: &TimestampMicrosecondArray, row: usize) -> Result<Option<DateTime<Utc>>> {
    if array.is_null(row) {
        Ok(None)
    } else {
        timestamp(array, row).map(Some)
    }
}

fn embedding_at(array: &FixedSizeListArray, row: usize) -> Result<Vec<f32>> {
    let values = array.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| EternalError::Storage("Failed to get embedding values".to_string()))?;
    Ok(floats.values().to_vec())
}

/// Build a fixed-size-list column, rejecting vectors of the wrong length
fn embedding_array(vectors: &[&[f32]], dimension: i32) -> Result<FixedSizeListArray> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension as usize) {
        return Err(EternalError::Storage(format!(
            "Embedding has {} dimensions, expected {dimension}",
            bad.len()
        )));
    }
    Ok(FixedSizeListArray::from_iter_primitive::<
        arrow_array::types::Float32Type,
        _,
        _,
    >(
        vectors
            .iter()
            .map(|v| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>())),
        dimension,
    ))
}

fn micros_column(values: impl Iterator<Item = DateTime<Utc>>) -> TimestampMicrosecondArray {
    TimestampMicrosecondArray::from(values.map(|t| t.timestamp_micros()).collect::<Vec<_>>())
        .with_timezone("UTC")
}

// -------------------------------------------------------------------------
// Row conversion
// -------------------------------------------------------------------------

fn items_to_batch(items: &[MemoryItem], schema: SchemaRef, dimension: i32) -> Result<RecordBatch> {
    let embeddings: Vec<&[f32]> = items.iter().map(|i| i.embedding.as_slice()).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                items.iter().map(|i| i.id.to_string()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.content.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items
                    .iter()
                    .map(|i| i.category_id.map(|c| c.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.category_path.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items
                    .iter()
                    .map(|i| i.resource_id.map(|r| r.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.kind.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(Float32Array::from(
                items.iter().map(|i| i.confidence).collect::<Vec<_>>(),
            )),
            Arc::new(Float32Array::from(
                items.iter().map(|i| i.importance).collect::<Vec<_>>(),
            )),
            Arc::new(Int32Array::from(
                items
                    .iter()
                    .map(|i| i.mention_count as i32)
                    .collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                items.iter().map(|i| i.is_active).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items
                    .iter()
                    .map(|i| i.superseded_by.map(|s| s.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                items.iter().map(|i| i.triples_pending).collect::<Vec<_>>(),
            )),
            Arc::new(micros_column(items.iter().map(|i| i.created_at))),
            Arc::new(micros_column(items.iter().map(|i| i.last_accessed))),
            Arc::new(embedding_array(&embeddings, dimension)?),
        ],
    )
    .map_err(|e| EternalError::Storage(format!("Failed to create item batch: {e}")))
}

fn items_from_batches(batches: &[RecordBatch]) -> Result<Vec<MemoryItem>> {
    let mut items = Vec::new();
    for batch in batches {
        let ids = column::<StringArray>(batch, "id")?;
        let contents = column::<StringArray>(batch, "content")?;
        let category_ids = column::<StringArray>(batch, "category_id")?;
        let category_paths = column::<StringArray>(batch, "category_path")?;
        let resource_ids = column::<StringArray>(batch, "resource_id")?;
        let kinds = column::<StringArray>(batch, "kind")?;
        let confidences = column::<Float32Array>(batch, "confidence")?;
        let importances = column::<Float32Array>(batch, "importance")?;
        let mentions = column::<Int32Array>(batch, "mention_count")?;
        let active = column::<BooleanArray>(batch, "is_active")?;
        let superseded = column::<StringArray>(batch, "superseded_by")?;
        let pending = column::<BooleanArray>(batch, "triples_pending")?;
        let created = column::<TimestampMicrosecondArray>(batch, "created_at")?;
        let accessed = column::<TimestampMicrosecondArray>(batch, "last_accessed")?;
        let embeddings = column::<FixedSizeListArray>(batch, "embedding")?;

        for row in 0..batch.num_rows() {
            let kind = kinds
                .value(row)
                .parse::<MemoryKind>()
                .map_err(EternalError::Storage)?;
            items.push(MemoryItem {
                id: parse_uuid(ids.value(row))?,
                content: contents.value(row).to_string(),
                category_id: optional_uuid(category_ids, row)?,
                category_path: category_paths.value(row).to_string(),
                resource_id: optional_uuid(resource_ids, row)?,
                kind,
                confidence: confidences.value(row),
                importance: importances.value(row),
                mention_count: mentions.value(row).max(1) as u32,
                is_active: active.value(row),
                superseded_by: optional_uuid(superseded, row)?,
                triples_pending: pending.value(row),
                created_at: timestamp(created, row)?,
                last_accessed: timestamp(accessed, row)?,
                embedding: embedding_at(embeddings, row)?,
            });
        }
    }
    Ok(items)
}

fn categories_from_batches(batches: &[RecordBatch]) -> Result<Vec<Category>> {
    let mut categories = Vec::new();
    for batch in batches {
        let ids = column::<StringArray>(batch, "id")?;
        let names = column::<StringArray>(batch, "name")?;
        let paths = column::<StringArray>(batch, "path")?;
        let parents = column::<StringArray>(batch, "parent_id")?;
        let summaries = column::<StringArray>(batch, "summary")?;
        let flags = column::<BooleanArray>(batch, "needs_reorganization")?;
        let accessed = column::<TimestampMicrosecondArray>(batch, "last_accessed")?;
        let embeddings = column::<FixedSizeListArray>(batch, "embedding")?;

        for row in 0..batch.num_rows() {
            categories.push(Category {
                id: parse_uuid(ids.value(row))?,
                name: names.value(row).to_string(),
                path: paths.value(row).to_string(),
                parent_id: optional_uuid(parents, row)?,
                summary: optional_string(summaries, row),
                needs_reorganization: flags.value(row),
                last_accessed: timestamp(accessed, row)?,
                embedding: embedding_at(embeddings, row)?,
            });
        }
    }
    Ok(categories)
}

fn triples_to_batch(
    triples: &[SemanticTriple],
    schema: SchemaRef,
    dimension: i32,
) -> Result<RecordBatch> {
    let subjects: Vec<&[f32]> = triples.iter().map(|t| t.subject_embedding.as_slice()).collect();
    let objects: Vec<&[f32]> = triples.iter().map(|t| t.object_embedding.as_slice()).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                triples.iter().map(|t| t.id.to_string()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples
                    .iter()
                    .map(|t| t.memory_item_id.map(|m| m.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples.iter().map(|t| t.subject.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples.iter().map(|t| t.predicate.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples.iter().map(|t| t.object.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples.iter().map(|t| t.context.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(Float32Array::from(
                triples.iter().map(|t| t.importance).collect::<Vec<_>>(),
            )),
            Arc::new(Float32Array::from(
                triples.iter().map(|t| t.confidence).collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                triples.iter().map(|t| t.is_active).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                triples
                    .iter()
                    .map(|t| t.superseded_by.map(|s| s.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(micros_column(triples.iter().map(|t| t.created_at))),
            Arc::new(micros_column(triples.iter().map(|t| t.last_accessed))),
            Arc::new(embedding_array(&subjects, dimension)?),
            Arc::new(embedding_array(&objects, dimension)?),
        ],
    )
    .map_err(|e| EternalError::Storage(format!("Failed to create triple batch: {e}")))
}

fn triples_from_batches(batches: &[RecordBatch]) -> Result<Vec<SemanticTriple>> {
    let mut triples = Vec::new();
    for batch in batches {
        let ids = column::<StringArray>(batch, "id")?;
        let item_ids = column::<StringArray>(batch, "memory_item_id")?;
        let subjects = column::<StringArray>(batch, "subject")?;
        let predicates = column::<StringArray>(batch, "predicate")?;
        let objects = column::<StringArray>(batch, "object")?;
        let contexts = column::<StringArray>(batch, "context")?;
        let importances = column::<Float32Array>(batch, "importance")?;
        let confidences = column::<Float32Array>(batch, "confidence")?;
        let active = column::<BooleanArray>(batch, "is_active")?;
        let superseded = column::<StringArray>(batch, "superseded_by")?;
        let created = column::<TimestampMicrosecondArray>(batch, "created_at")?;
        let accessed = column::<TimestampMicrosecondArray>(batch, "last_accessed")?;
        let subject_embeddings = column::<FixedSizeListArray>(batch, "subject_embedding")?;
        let object_embeddings = column::<FixedSizeListArray>(batch, "object_embedding")?;

        for row in 0..batch.num_rows() {
            // Stored predicates are already canonical; build the struct
            // directly rather than through `SemanticTriple::new`.
            triples.push(SemanticTriple {
                id: parse_uuid(ids.value(row))?,
                memory_item_id: optional_uuid(item_ids, row)?,
                subject: subjects.value(row).to_string(),
                predicate: predicates.value(row).to_string(),
                object: objects.value(row).to_string(),
                context: optional_string(contexts, row),
                importance: importances.value(row),
                confidence: confidences.value(row),
                is_active: active.value(row),
                superseded_by: optional_uuid(superseded, row)?,
                created_at: timestamp(created, row)?,
                last_accessed: timestamp(accessed, row)?,
                subject_embedding: embedding_at(subject_embeddings, row)?,
                object_embedding: embedding_at(object_embeddings, row)?,
            });
        }
    }
    Ok(triples)
}

fn tasks_from_batches(batches: &[RecordBatch]) -> Result<Vec<ScheduledTask>> {
    let mut tasks = Vec::new();
    for batch in batches {
        let ids = column::<StringArray>(batch, "id")?;
        let names = column::<StringArray>(batch, "name")?;
        let job_types = column::<StringArray>(batch, "job_type")?;
        let intervals = column::<Int64Array>(batch, "interval_seconds")?;
        let enabled = column::<BooleanArray>(batch, "enabled")?;
        let system = column::<BooleanArray>(batch, "is_system")?;
        let last_runs = column::<TimestampMicrosecondArray>(batch, "last_run")?;
        let next_runs = column::<TimestampMicrosecondArray>(batch, "next_run")?;

        for row in 0..batch.num_rows() {
            let job_type = job_types
                .value(row)
                .parse::<JobType>()
                .map_err(EternalError::Storage)?;
            tasks.push(ScheduledTask {
                id: parse_uuid(ids.value(row))?,
                name: names.value(row).to_string(),
                job_type,
                interval_seconds: intervals.value(row).max(0) as u64,
                enabled: enabled.value(row),
                is_system: system.value(row),
                last_run: optional_timestamp(last_runs, row)?,
                next_run: optional_timestamp(next_runs, row)?,
            });
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 8;

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        v
    }

    fn item(content: &str, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem::new(
            content.to_string(),
            embedding,
            MemoryKind::Fact,
            "knowledge".to_string(),
        )
    }

    async fn open_store() -> (tempfile::TempDir, LanceStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LanceStore::open(temp_dir.path(), DIM).await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_open_creates_and_reopens_tables() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = LanceStore::open(temp_dir.path(), DIM).await.unwrap();
            store.insert_item(&item("kept", unit(0))).await.unwrap();
        }

        let store = LanceStore::open(temp_dir.path(), DIM).await.unwrap();
        assert_eq!(store.count_items(&ItemFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_dimension_change() {
        let temp_dir = tempfile::tempdir().unwrap();
        LanceStore::open(temp_dir.path(), DIM).await.unwrap();

        let err = LanceStore::open(temp_dir.path(), DIM * 2).await.err().unwrap();
        assert!(matches!(err, EternalError::Config(_)));
    }

    #[test]
    fn test_items_schema_fields() {
        let schema = items_schema(DIM as i32);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        for expected in [
            "id",
            "content",
            "category_path",
            "importance",
            "mention_count",
            "is_active",
            "superseded_by",
            "embedding",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_item() {
        let (_dir, store) = open_store().await;
        let original = item("User's cat is named Miso", unit(1)).with_importance(0.7);
        store.insert_item(&original).await.unwrap();

        let loaded = store.get_item(original.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "User's cat is named Miso");
        assert_eq!(loaded.importance, 0.7);
        assert_eq!(loaded.mention_count, 1);
        assert!(loaded.is_active);
        assert_eq!(loaded.embedding, unit(1));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let (_dir, store) = open_store().await;
        let err = store.insert_item(&item("short", vec![1.0; 3])).await.unwrap_err();
        assert!(matches!(err, EternalError::Storage(_)));
    }

    #[tokio::test]
    async fn test_reinforce_persists() {
        let (_dir, store) = open_store().await;
        let mut stored = item("fact", unit(0)).with_importance(0.5);
        store.insert_item(&stored).await.unwrap();

        stored.reinforce(0.1);
        store.reinforce_item(&stored).await.unwrap();

        let loaded = store.get_item(stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.mention_count, 2);
        assert!((loaded.importance - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_supersede_is_one_way() {
        let (_dir, store) = open_store().await;
        let old = item("User lives in Busan", unit(0));
        let new = item("User lives in Seoul", unit(1));
        store.insert_items(&[old.clone(), new.clone()]).await.unwrap();

        assert!(store.supersede_item(old.id, new.id).await.unwrap());
        // Already inactive: a second supersession is a no-op
        assert!(!store.supersede_item(old.id, Uuid::new_v4()).await.unwrap());

        let loaded = store.get_item(old.id).await.unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(loaded.superseded_by, Some(new.id));
        assert_eq!(loaded.content, "User lives in Busan");
    }

    #[tokio::test]
    async fn test_supersede_self_is_error() {
        let (_dir, store) = open_store().await;
        let only = item("fact", unit(0));
        store.insert_item(&only).await.unwrap();

        assert!(store.supersede_item(only.id, only.id).await.is_err());
        assert!(store.get_item(only.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_search_items_orders_by_similarity() {
        let (_dir, store) = open_store().await;
        let near = item("near", unit(0));
        let mut mid_vec = unit(0);
        mid_vec[1] = 1.0;
        let mid = item("mid", mid_vec);
        let far = item("far", unit(2));
        store
            .insert_items(&[far.clone(), mid.clone(), near.clone()])
            .await
            .unwrap();

        let results = store
            .search_items(&unit(0), &ItemFilter::active(), 3)
            .await
            .unwrap();
        assert_eq!(results[0].0.id, near.id);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(results[1].0.id, mid.id);
    }

    #[tokio::test]
    async fn test_search_empty_table() {
        let (_dir, store) = open_store().await;
        let results = store
            .search_items(&unit(0), &ItemFilter::active(), 5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_text_search_is_case_insensitive() {
        let (_dir, store) = open_store().await;
        let old = item("User's dentist is Dr. Kim", unit(0));
        let current = item("User's DENTIST moved to Busan", unit(1));
        let other = item("User loves coffee", unit(2));
        store
            .insert_items(&[old.clone(), current.clone(), other])
            .await
            .unwrap();
        store.supersede_item(old.id, current.id).await.unwrap();

        let found = store.text_search_items("dentist", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, current.id);

        let quoted = store.text_search_items("user's", 10).await.unwrap();
        assert_eq!(quoted.len(), 1);
        assert_eq!(quoted[0].id, current.id);
    }

    #[tokio::test]
    async fn test_list_items_since() {
        let (_dir, store) = open_store().await;
        let mut old = item("Visited Jeju last spring", unit(0));
        old.created_at = Utc::now() - chrono::Duration::days(30);
        let recent = item("Booked a dentist appointment", unit(1));
        store.insert_items(&[old.clone(), recent.clone()]).await.unwrap();

        let since = Utc::now() - chrono::Duration::days(1);
        let found = store
            .list_items(&ItemFilter::active().since(since))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent.id);

        let all = store
            .list_items(&ItemFilter::active().since(old.created_at))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_categories_by_path() {
        let (_dir, store) = open_store().await;
        let root = Category::new("knowledge", None, unit(0));
        let child = Category::new("knowledge/coding", Some(root.id), unit(1));
        store
            .insert_categories(&[root.clone(), child.clone()])
            .await
            .unwrap();

        let loaded = store
            .get_category_by_path("knowledge/coding")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.parent_id, Some(root.id));
        assert!(store.get_category_by_path("personal").await.unwrap().is_none());

        store
            .update_category_summary(child.id, "Coding notes, incl. user's tools")
            .await
            .unwrap();
        let loaded = store
            .get_category_by_path("knowledge/coding")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.summary.as_deref(),
            Some("Coding notes, incl. user's tools")
        );
    }

    #[tokio::test]
    async fn test_triple_search_merges_columns() {
        let (_dir, store) = open_store().await;
        let mut triple = SemanticTriple::new("user", "likes", "coffee", None);
        triple.subject_embedding = unit(0);
        triple.object_embedding = unit(1);
        store.insert_triples(&[triple.clone()]).await.unwrap();

        let results = store.search_triples(&unit(1), 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].1 - 1.0).abs() < 1e-5);

        let by_subject = store.active_triples_for_subject("USER").await.unwrap();
        assert_eq!(by_subject.len(), 1);
    }

    #[tokio::test]
    async fn test_task_upsert() {
        let (_dir, store) = open_store().await;
        let mut task = ScheduledTask::new("maintenance", JobType::Maintenance, 43_200, true);
        store.upsert_task(&task).await.unwrap();

        task.mark_run(Utc::now());
        task.enabled = false;
        store.upsert_task(&task).await.unwrap();

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].enabled);
        assert!(tasks[0].last_run.is_some());
    }

    #[tokio::test]
    async fn test_resource_round_trip_and_stats() {
        let (_dir, store) = open_store().await;
        let resource = Resource::new(
            "conversation://test",
            "conversation",
            "I live in Seoul",
            serde_json::json!({"source": "test"}),
        );
        store.insert_resource(&resource).await.unwrap();
        store.insert_item(&item("fact", unit(0))).await.unwrap();

        let loaded = store.get_resource(resource.id).await.unwrap().unwrap();
        assert_eq!(loaded.metadata["source"], "test");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.resources, 1);
        assert_eq!(stats.items, 1);
        assert_eq!(stats.active_items, 1);
        assert_eq!(stats.superseded_items, 0);
    }
}
