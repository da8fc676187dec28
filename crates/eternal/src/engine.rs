//! The Eternal memory system
//!
//! [`EternalMemory`] opens the store, replays the conversation buffer,
//! wires the pipelines together and owns the scheduler. It is the surface
//! the daemon and the CLI talk to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::buffer::{BufferEntry, BufferFlusher, BufferStatus, ConversationBuffer, FlushReport};
use crate::config::Config;
use crate::consolidate::{ConsolidationPipeline, ConsolidationReport};
use crate::error::{EternalError, Result};
use crate::llm::LlmService;
use crate::memory::types::{JobType, ScheduledTask};
use crate::memory::{
    FactInput, MemorizePipeline, MemorizeReport, PredictPipeline, RankedResult, RetrievalEngine,
    RetrievalMode, TripleExtractor,
};
use crate::scheduler::{JobContext, Scheduler, builtin_tasks, handler_for};
use crate::storage::{LanceStore, StoreStats};
use crate::vault::Mirror;

pub struct EternalMemory {
    config: Config,
    store: Arc<LanceStore>,
    buffer: Arc<Mutex<ConversationBuffer>>,
    memorize: Arc<MemorizePipeline>,
    retrieval: RetrievalEngine,
    consolidation: Arc<ConsolidationPipeline>,
    predict: PredictPipeline,
    flusher: BufferFlusher,
    scheduler: Arc<Scheduler>,
    jobs: Arc<JobContext>,
}

impl EternalMemory {
    /// Open every component and register the scheduled jobs.
    ///
    /// The scheduler is not started; call [`EternalMemory::start_scheduler`].
    pub async fn open(
        config: Config,
        llm: Arc<dyn LlmService>,
        mirror: Arc<dyn Mirror>,
    ) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        info!("Initializing storage at: {}", data_dir.display());
        let store = Arc::new(LanceStore::open(data_dir, config.storage.embedding_dimension).await?);

        let buffer = ConversationBuffer::open(
            &config.buffer_log_path(),
            config.buffer.flush_threshold_tokens,
        )
        .await?;
        let buffer = Arc::new(Mutex::new(buffer));

        let memorize = Arc::new(MemorizePipeline::new(
            store.clone(),
            llm.clone(),
            mirror.clone(),
            config.memorize.clone(),
            config.features.clone(),
        ));
        memorize.seed_root_categories().await?;

        let retrieval = RetrievalEngine::new(
            store.clone(),
            llm.clone(),
            config.scoring.clone(),
            config.features.semantic_triples,
        );
        let consolidation = Arc::new(ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            mirror.clone(),
            config.consolidation.clone(),
        ));
        let predict = PredictPipeline::new(store.clone(), llm.clone());
        let flusher = BufferFlusher::new(
            buffer.clone(),
            memorize.clone(),
            llm.clone(),
            mirror.clone(),
            config.profile.clone(),
        );

        let jobs = Arc::new(JobContext {
            store: store.clone(),
            llm: llm.clone(),
            mirror,
            memorize: memorize.clone(),
            consolidation: consolidation.clone(),
            triples: Arc::new(TripleExtractor::new(store.clone(), llm.clone())),
            profile: config.profile.clone(),
            lazy_triple_batch: config.scheduler.lazy_triple_batch,
        });

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            Duration::from_millis(config.scheduler.tick_millis),
        ));
        for task in builtin_tasks(&config) {
            if let Some(handler) = handler_for(task.job_type, jobs.clone()) {
                scheduler.register(task, handler).await?;
            }
        }
        match scheduler.load_custom_tasks(&jobs).await {
            Ok(0) => {}
            Ok(n) => info!("Loaded {} custom jobs", n),
            Err(e) => warn!("Failed to load custom jobs: {}", e),
        }

        info!("Eternal memory ready (LLM provider: {})", llm.name());
        Ok(Self {
            config,
            store,
            buffer,
            memorize,
            retrieval,
            consolidation,
            predict,
            flusher,
            scheduler,
            jobs,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<LanceStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Extract and store facts from free text
    pub async fn memorize(&self, text: &str, metadata: serde_json::Value) -> Result<MemorizeReport> {
        self.memorize.memorize(text, metadata).await
    }

    /// Store one fact directly
    pub async fn save_fact(&self, fact: FactInput) -> Result<MemorizeReport> {
        self.memorize.save_fact(fact).await
    }

    /// Retrieve memories, using the latest buffered turns to resolve vague
    /// queries
    pub async fn retrieve(&self, query: &str, mode: RetrievalMode) -> Result<RankedResult> {
        let conversation = self
            .buffer
            .lock()
            .await
            .recent_context(self.config.buffer.context_turns);
        self.retrieval.retrieve(query, mode, &conversation).await
    }

    pub async fn add_to_buffer(&self, role: &str, content: &str) -> Result<BufferEntry> {
        self.buffer.lock().await.append(role, content).await
    }

    pub async fn buffer_status(&self) -> BufferStatus {
        self.buffer.lock().await.status()
    }

    pub async fn check_and_flush(&self) -> Result<Option<FlushReport>> {
        self.flusher.check_and_flush().await
    }

    pub async fn flush_buffer(&self) -> Result<FlushReport> {
        self.flusher.flush().await
    }

    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        self.consolidation.run().await
    }

    pub async fn predict_context(&self, context: &serde_json::Value) -> Result<String> {
        self.predict.predict(context).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Register a user-defined job running one of the built-in bodies
    pub async fn add_job(&self, name: &str, job_type: JobType, interval_seconds: u64) -> Result<()> {
        let handler = handler_for(job_type, self.jobs.clone()).ok_or_else(|| {
            EternalError::Scheduler(format!("Job type {job_type} has no built-in body"))
        })?;
        self.scheduler
            .register(ScheduledTask::new(name, job_type, interval_seconds, false), handler)
            .await
    }

    /// Start background jobs unless disabled in the config
    pub async fn start_scheduler(&self) {
        if !self.config.scheduler.enabled {
            info!("Scheduler disabled by configuration");
            return;
        }
        self.scheduler.start().await;
    }

    /// Stop the scheduler and flush whatever is still buffered.
    ///
    /// A failed flush is returned; the buffer log stays on disk and is
    /// replayed on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Eternal memory");
        self.scheduler.stop().await;

        if !self.buffer.lock().await.is_empty() {
            let report = self.flusher.flush().await?;
            info!(
                "Flushed {} buffered messages on shutdown",
                report.flushed_messages
            );
        }
        Ok(())
    }
}
