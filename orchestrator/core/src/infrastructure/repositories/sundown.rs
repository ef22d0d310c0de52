// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File-backed sundown repository
//!
//! ```text
//! <state_dir>/
//!   state/<agent>.json                 latest unconsumed state
//!   archive/<agent>_<timestamp>.json   consumed states (when archiving)
//!   fresh/<agent>                      fresh-start marker
//! ```
//!
//! Documents are written to a temp file and renamed into place.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::domain::lifecycle::SundownState;
use crate::domain::registry::validate_agent_name;
use crate::domain::repository::{RepositoryError, SundownRepository};

const STATE_DIR: &str = "state";
const ARCHIVE_DIR: &str = "archive";
const FRESH_DIR: &str = "fresh";

#[derive(Debug, Clone)]
pub struct FileSundownRepository {
    root: PathBuf,
    archive: bool,
}

impl FileSundownRepository {
    pub fn new(root: impl Into<PathBuf>, archive: bool) -> Self {
        Self {
            root: root.into(),
            archive,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, agent: &str) -> Result<PathBuf, RepositoryError> {
        checked(agent)?;
        Ok(self.root.join(STATE_DIR).join(format!("{}.json", agent)))
    }

    fn fresh_path(&self, agent: &str) -> Result<PathBuf, RepositoryError> {
        checked(agent)?;
        Ok(self.root.join(FRESH_DIR).join(agent))
    }

    fn archive_path(&self, agent: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        self.root
            .join(ARCHIVE_DIR)
            .join(format!("{}_{}.json", agent, stamp))
    }
}

fn checked(agent: &str) -> Result<(), RepositoryError> {
    validate_agent_name(agent).map_err(|e| RepositoryError::Storage(e.to_string()))
}

async fn read_state(path: &Path) -> Result<Option<SundownState>, RepositoryError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), RepositoryError> {
    let parent = path
        .parent()
        .ok_or_else(|| RepositoryError::Storage(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).await?;

    let temp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let mut file = fs::File::create(&temp).await?;
    let written = async {
        file.write_all(content).await?;
        file.sync_all().await?;
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl SundownRepository for FileSundownRepository {
    async fn save(&self, state: &SundownState) -> Result<(), RepositoryError> {
        let path = self.state_path(&state.agent_name)?;
        write_atomic(&path, &serde_json::to_vec_pretty(state)?).await?;
        debug!(agent = %state.agent_name, path = %path.display(), "Saved sundown state");
        Ok(())
    }

    async fn find_latest(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError> {
        read_state(&self.state_path(agent)?).await
    }

    async fn consume(&self, agent: &str) -> Result<Option<SundownState>, RepositoryError> {
        let path = self.state_path(agent)?;
        let Some(state) = read_state(&path).await? else {
            return Ok(None);
        };

        if self.archive {
            let archived = self.archive_path(agent);
            fs::create_dir_all(self.root.join(ARCHIVE_DIR)).await?;
            fs::rename(&path, &archived).await?;
            info!(agent, archive = %archived.display(), "Archived consumed sundown state");
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(Some(state))
    }

    async fn list_pending(&self) -> Result<Vec<SundownState>, RepositoryError> {
        let dir = self.root.join(STATE_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_state(&path).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable sundown state"),
            }
        }
        states.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        Ok(states)
    }

    async fn set_fresh_start(&self, agent: &str, needed: bool) -> Result<(), RepositoryError> {
        let path = self.fresh_path(agent)?;
        if needed {
            write_atomic(&path, Utc::now().to_rfc3339().as_bytes()).await
        } else {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    async fn needs_fresh_start(&self, agent: &str) -> Result<bool, RepositoryError> {
        Ok(fs::try_exists(self.fresh_path(agent)?).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::budget::Severity;
    use crate::domain::lifecycle::SundownReason;

    fn state(agent: &str) -> SundownState {
        SundownState::authored(
            agent,
            SundownReason::Threshold(Severity::AutoPreserve),
            "Decision: keep going".to_string(),
            8_600,
        )
    }

    #[tokio::test]
    async fn test_state_survives_a_new_repository_instance() {
        let dir = tempfile::tempdir().unwrap();
        FileSundownRepository::new(dir.path(), true)
            .save(&state("gamma"))
            .await
            .unwrap();

        let reopened = FileSundownRepository::new(dir.path(), true);
        let found = reopened.find_latest("gamma").await.unwrap().unwrap();
        assert_eq!(found.usage_at_capture, 8_600);
        assert_eq!(reopened.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_consume_archives_state() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSundownRepository::new(dir.path(), true);
        repo.save(&state("gamma")).await.unwrap();

        assert!(repo.consume("gamma").await.unwrap().is_some());
        assert!(repo.consume("gamma").await.unwrap().is_none());

        let archived: Vec<_> = std::fs::read_dir(dir.path().join(ARCHIVE_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].file_name().to_string_lossy().starts_with("gamma_"));
    }

    #[tokio::test]
    async fn test_consume_without_archive_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSundownRepository::new(dir.path(), false);
        repo.save(&state("gamma")).await.unwrap();
        repo.consume("gamma").await.unwrap();
        assert!(!dir.path().join(ARCHIVE_DIR).exists());
        assert!(repo.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_start_marker() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSundownRepository::new(dir.path(), true);
        repo.set_fresh_start("gamma", true).await.unwrap();
        assert!(repo.needs_fresh_start("gamma").await.unwrap());
        repo.set_fresh_start("gamma", false).await.unwrap();
        repo.set_fresh_start("gamma", false).await.unwrap();
        assert!(!repo.needs_fresh_start("gamma").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSundownRepository::new(dir.path(), true);
        assert!(repo.find_latest("../etc").await.is_err());
    }
}
