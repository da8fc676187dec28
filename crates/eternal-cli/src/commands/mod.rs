pub mod buffer;
pub mod jobs;
pub mod memory;
pub mod stats;

use std::sync::Arc;

use eternal_memory::EternalMemory;
use eternal_memory::config::Config;
use eternal_memory::llm::RemoteLlm;
use eternal_memory::storage::LanceStore;
use eternal_memory::vault::MarkdownVault;

use crate::error::CliResult;

pub use buffer::BufferCommand;
pub use jobs::JobsCommand;
pub use memory::MemoryCommand;
pub use stats::StatsCommand;

/// Open the store alone, for read-only commands that need no model
pub async fn open_store(config: &Config) -> CliResult<LanceStore> {
    Ok(LanceStore::open(&config.storage.data_dir, config.storage.embedding_dimension).await?)
}

/// Open the full memory system against the configured provider and vault.
///
/// The scheduler is not started; commands trigger jobs by hand.
pub async fn open_memory(config: &Config) -> CliResult<EternalMemory> {
    let llm = Arc::new(RemoteLlm::new(&config.llm)?);
    let vault = Arc::new(MarkdownVault::new(config.vault_path()));
    Ok(EternalMemory::open(config.clone(), llm, vault).await?)
}
