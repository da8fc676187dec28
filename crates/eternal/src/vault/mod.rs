//! Human-readable markdown mirror of the store
//!
//! The mirror receives append-only copies of timeline entries, stored facts
//! and category summaries. It is never read back by the core; a failing
//! mirror never rolls back a store write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::llm::ProfileInsight;
use crate::memory::types::MemoryItem;

const BACKUP_DIR: &str = ".backups";

/// Mirror collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror unavailable: {0}")]
    Unavailable(String),
}

/// Which profile document an insight lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileTier {
    /// Captured at flush time with a low bar
    Provisional,
    /// Validated by the nightly profile reflection
    Curated,
}

#[async_trait]
pub trait Mirror: Send + Sync {
    async fn append_timeline(&self, entry: &str) -> Result<(), MirrorError>;

    /// Record a newly stored fact under its category
    async fn append_item(&self, item: &MemoryItem) -> Result<(), MirrorError>;

    /// Record that an existing fact was stated again
    async fn record_reinforcement(&self, item: &MemoryItem) -> Result<(), MirrorError>;

    async fn write_category_summary(&self, path: &str, summary: &str) -> Result<(), MirrorError>;

    async fn append_profile_insights(
        &self,
        insights: &[ProfileInsight],
        tier: ProfileTier,
    ) -> Result<(), MirrorError>;

    /// Snapshot the mirror and return the snapshot location
    async fn backup(&self) -> Result<PathBuf, MirrorError>;
}

/// Markdown files under a vault directory:
///
/// ```text
/// timeline/2026-01-31.md
/// categories/knowledge/coding.md
/// categories/knowledge/coding.summary.md
/// profile/observations.md
/// profile/user.md
/// .backups/vault-20260131T120000/
/// ```
#[derive(Debug, Clone)]
pub struct MarkdownVault {
    root: PathBuf,
}

impl MarkdownVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn timeline_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("timeline")
            .join(format!("{}.md", at.format("%Y-%m-%d")))
    }

    fn category_path(&self, path: &str, suffix: &str) -> PathBuf {
        let mut file = self.root.join("categories");
        let mut segments: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".." && *s != ".")
            .collect();
        let name = segments.pop().unwrap_or("uncategorized");
        for segment in segments {
            file.push(segment);
        }
        file.push(format!("{name}.{suffix}"));
        file
    }

    async fn append(&self, path: &Path, text: &str) -> Result<(), MirrorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Mirror for MarkdownVault {
    async fn append_timeline(&self, entry: &str) -> Result<(), MirrorError> {
        let now = Utc::now();
        let line = format!("- {} {}\n", now.format("%H:%M:%S"), entry);
        self.append(&self.timeline_path(now), &line).await
    }

    async fn append_item(&self, item: &MemoryItem) -> Result<(), MirrorError> {
        let line = format!(
            "- [{}] {} (importance {:.2}, id {})\n",
            item.kind, item.content, item.importance, item.id
        );
        self.append(&self.category_path(&item.category_path, "md"), &line)
            .await
    }

    async fn record_reinforcement(&self, item: &MemoryItem) -> Result<(), MirrorError> {
        let line = format!(
            "- reinforced: {} (importance {:.2}, mentions {}, id {})\n",
            item.content, item.importance, item.mention_count, item.id
        );
        self.append(&self.category_path(&item.category_path, "md"), &line)
            .await
    }

    async fn write_category_summary(&self, path: &str, summary: &str) -> Result<(), MirrorError> {
        let file = self.category_path(path, "summary.md");
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let text = format!(
            "# {path}\n\n_Updated {}_\n\n{summary}\n",
            Utc::now().format("%Y-%m-%d %H:%M")
        );
        fs::write(&file, text).await?;
        Ok(())
    }

    async fn append_profile_insights(
        &self,
        insights: &[ProfileInsight],
        tier: ProfileTier,
    ) -> Result<(), MirrorError> {
        if insights.is_empty() {
            return Ok(());
        }
        let file = match tier {
            ProfileTier::Provisional => "observations.md",
            ProfileTier::Curated => "user.md",
        };
        let date = Utc::now().format("%Y-%m-%d");
        let text: String = insights
            .iter()
            .map(|i| {
                format!(
                    "- {date} {} (confidence {:.2}, evidence {})\n",
                    i.content, i.confidence, i.evidence_count
                )
            })
            .collect();
        self.append(&self.root.join("profile").join(file), &text)
            .await
    }

    async fn backup(&self) -> Result<PathBuf, MirrorError> {
        if !fs::try_exists(&self.root).await? {
            return Err(MirrorError::Unavailable(format!(
                "vault directory {} does not exist",
                self.root.display()
            )));
        }

        let target = self
            .root
            .join(BACKUP_DIR)
            .join(format!("vault-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        let copied = copy_tree(&self.root, &target).await?;
        info!("Vault backup written to {} ({} files)", target.display(), copied);
        Ok(target)
    }
}

/// Copy every file under `from` into `to`, skipping the backups directory
async fn copy_tree(from: &Path, to: &Path) -> Result<usize, MirrorError> {
    let (from, to) = (from.to_path_buf(), to.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree_blocking(&from, &to))
        .await
        .map_err(|e| MirrorError::Unavailable(format!("backup task failed: {e}")))?
}

fn copy_tree_blocking(from: &Path, to: &Path) -> Result<usize, MirrorError> {
    let mut copied = 0;
    let walker = walkdir::WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != BACKUP_DIR);

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| MirrorError::Unavailable(format!("unexpected vault path: {e}")))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!("Copied {} files from {}", copied, from.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryKind;
    use tempfile::TempDir;

    fn item(content: &str, path: &str) -> MemoryItem {
        MemoryItem::new(
            content.to_string(),
            vec![],
            MemoryKind::Fact,
            path.to_string(),
        )
    }

    #[tokio::test]
    async fn test_items_append_to_category_file() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path());

        vault.append_item(&item("User lives in Seoul", "personal/location")).await.unwrap();
        vault.append_item(&item("User moved in 2024", "personal/location")).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("categories/personal/location.md"))
            .unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("User lives in Seoul"));
    }

    #[tokio::test]
    async fn test_summary_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path());

        vault.write_category_summary("knowledge/coding", "Old").await.unwrap();
        vault.write_category_summary("knowledge/coding", "Rust and Python").await.unwrap();

        let text =
            std::fs::read_to_string(dir.path().join("categories/knowledge/coding.summary.md"))
                .unwrap();
        assert!(text.contains("Rust and Python"));
        assert!(!text.contains("Old"));
    }

    #[tokio::test]
    async fn test_profile_tiers_use_separate_files() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path());
        let insights = vec![ProfileInsight::new("Works late", 0.9, 3)];

        vault
            .append_profile_insights(&insights, ProfileTier::Provisional)
            .await
            .unwrap();
        vault
            .append_profile_insights(&insights, ProfileTier::Curated)
            .await
            .unwrap();

        assert!(dir.path().join("profile/observations.md").exists());
        assert!(dir.path().join("profile/user.md").exists());
    }

    #[tokio::test]
    async fn test_backup_skips_previous_backups() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path());
        vault.append_timeline("Stored 2 facts").await.unwrap();

        let first = vault.backup().await.unwrap();
        assert!(first.join("timeline").exists());
        assert!(!first.join(BACKUP_DIR).exists());
        assert!(first.join(format!("timeline/{}.md", Utc::now().format("%Y-%m-%d"))).is_file());

        vault.append_item(&item("Prefers tabs", "knowledge/coding")).await.unwrap();
        let second = vault.backup().await.unwrap();
        assert!(second.join("categories/knowledge/coding.md").is_file());
        assert!(!second.join(BACKUP_DIR).exists());
    }

    #[tokio::test]
    async fn test_dotted_category_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path());

        vault.append_item(&item("Uses Express", "knowledge/node.js")).await.unwrap();
        vault.append_item(&item("Runs a Raspberry Pi node", "knowledge/node")).await.unwrap();
        vault.write_category_summary("knowledge/v1.2", "Legacy API").await.unwrap();

        let base = dir.path().join("categories/knowledge");
        let js = std::fs::read_to_string(base.join("node.js.md")).unwrap();
        let plain = std::fs::read_to_string(base.join("node.md")).unwrap();
        assert!(js.contains("Uses Express") && !js.contains("Raspberry"));
        assert!(plain.contains("Raspberry") && !plain.contains("Express"));
        assert!(base.join("v1.2.summary.md").is_file());
    }

    #[tokio::test]
    async fn test_backup_missing_root() {
        let dir = TempDir::new().unwrap();
        let vault = MarkdownVault::new(dir.path().join("missing"));
        assert!(matches!(
            vault.backup().await,
            Err(MirrorError::Unavailable(_))
        ));
    }
}
