use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// External collaborator holding per-patient records. The conversation core
/// touches it only at start (lookup) and on a confirmed booking (write).
#[async_trait]
pub trait PatientHistoryStore: Send + Sync {
    async fn record(&self, patient_id: &str, category: &str, payload: Value) -> Result<()>;

    /// All stored payloads for a patient, grouped by category. Unknown
    /// patients yield an empty map.
    async fn history(&self, patient_id: &str) -> Result<BTreeMap<String, Vec<Value>>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordEnvelope {
    timestamp: String,
    category: String,
    data: Value,
}

/// File-backed store: one directory per patient, one timestamped JSON file
/// per record.
pub struct FilePatientHistory {
    root: PathBuf,
}

impl FilePatientHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PatientHistoryStore for FilePatientHistory {
    async fn record(&self, patient_id: &str, category: &str, payload: Value) -> Result<()> {
        let dir = self.root.join(patient_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating patient dir {}", dir.display()))?;

        let now = Utc::now();
        let envelope = RecordEnvelope {
            timestamp: now.to_rfc3339(),
            category: category.to_string(),
            data: payload,
        };
        let path = dir.join(format!("{category}_{}.json", now.format("%Y%m%d_%H%M%S%3f")));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&envelope)?)
            .await
            .with_context(|| format!("writing record {}", path.display()))?;

        info!(patient_id, category, path = %path.display(), "stored patient record");
        Ok(())
    }

    async fn history(&self, patient_id: &str) -> Result<BTreeMap<String, Vec<Value>>> {
        let dir = self.root.join(patient_id);
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return Ok(grouped);
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let raw = tokio::fs::read_to_string(&path).await?;
            let envelope: RecordEnvelope = serde_json::from_str(&raw)
                .with_context(|| format!("parsing record {}", path.display()))?;
            grouped
                .entry(envelope.category)
                .or_default()
                .push(envelope.data);
        }
        Ok(grouped)
    }
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryPatientHistory {
    records: DashMap<String, Vec<(String, Value)>>,
}

impl InMemoryPatientHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatientHistoryStore for InMemoryPatientHistory {
    async fn record(&self, patient_id: &str, category: &str, payload: Value) -> Result<()> {
        self.records
            .entry(patient_id.to_string())
            .or_default()
            .push((category.to_string(), payload));
        Ok(())
    }

    async fn history(&self, patient_id: &str) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        if let Some(records) = self.records.get(patient_id) {
            for (category, payload) in records.iter() {
                grouped
                    .entry(category.clone())
                    .or_default()
                    .push(payload.clone());
            }
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_roundtrip_groups_by_category() {
        let store = InMemoryPatientHistory::new();
        store
            .record("P1", "conversation", json!({"a": 1}))
            .await
            .unwrap();
        store
            .record("P1", "conversation", json!({"a": 2}))
            .await
            .unwrap();
        store.record("P1", "symptoms", json!("ho")).await.unwrap();

        let history = store.history("P1").await.unwrap();
        assert_eq!(history.get("conversation").unwrap().len(), 2);
        assert_eq!(history.get("symptoms").unwrap().len(), 1);
        assert!(store.history("P2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let root = std::env::temp_dir().join(format!("intake-history-{}", std::process::id()));
        let store = FilePatientHistory::new(&root);
        store
            .record("P20240101", "conversation", json!({"name": "A"}))
            .await
            .unwrap();

        let history = store.history("P20240101").await.unwrap();
        let records = history.get("conversation").unwrap();
        assert_eq!(records.len(), 1);
        // Raw payloads come back, same contract as the in-memory store.
        assert_eq!(records[0], json!({"name": "A"}));
        assert_eq!(records[0]["name"], "A");
        assert!(store.history("unknown").await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
