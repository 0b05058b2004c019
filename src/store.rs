//! Append-only audit records (requests, webhooks, tool payloads).
//!
//! Records live in memory and, when a file is configured, are appended to it as
//! JSON lines and reloaded from it on startup.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Error, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{Mutex, RwLock},
};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RecordStore {
    records: RwLock<Vec<Record>>,
    file: Option<Mutex<File>>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let mut records = Vec::new();
        if path.exists() {
            let mut lines = BufReader::new(File::open(path).await?).lines();
            let mut number = 0;
            while let Some(line) = lines.next_line().await? {
                number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let record = serde_json::from_str(&line)
                    .with_context(|| format!("Bad record at {}:{number}", path.display()))?;
                records.push(record);
            }
        }
        log::info!("Loaded {} records from {}", records.len(), path.display());

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            records: RwLock::new(records),
            file: Some(Mutex::new(file)),
        })
    }

    /// Stores a record; `name` and `data` are trimmed and `name` must not end up empty.
    pub async fn insert(&self, name: &str, data: Option<&str>) -> Result<Record, Error> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Record name is required");
        }
        let now = Utc::now();
        let record = Record {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            data: data.map(|data| data.trim().to_string()),
            created_at: now,
            updated_at: now,
        };

        if let Some(file) = &self.file {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            let mut file = file.lock().await;
            file.write_all(&line).await?;
            file.flush().await?;
        }
        self.records.write().await.push(record.clone());
        log::debug!("Stored record {} ({})", record.id, record.name);
        Ok(record)
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<Record> {
        self.records.read().await.iter().rev().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Stores without waiting; failures are only logged.
    pub fn record_in_background(self: &Arc<Self>, name: &'static str, data: String) {
        let store = self.clone();
        tokio::task::spawn(async move {
            if let Err(err) = store.insert(name, Some(&data)).await {
                log::error!("Cannot store {name:?} record: {err:#}");
            }
        });
    }
}
