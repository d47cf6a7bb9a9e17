//! Prediction history
//!
//! An append-only log of predictions, newest first on read. MongoDB backs it
//! in production; [`InMemoryHistory`] serves tests and local runs.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newest entries returned by `/history`
pub const HISTORY_LIMIT: usize = 20;

/// Server selection and connect timeout for the history database
pub const MONGO_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Malformed history document: {0}")]
    Document(#[from] bson::de::Error),

    #[error("Failed to encode history record: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("History store lock poisoned")]
    Poisoned,
}

/// A prediction as stored: `image` is the absolute path of the saved upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image: String,
    pub label: String,
    pub confidence: f32,
    pub time: String,
}

/// A stored prediction with its identifier rendered as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: PredictionRecord,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert(&self, record: &PredictionRecord) -> Result<(), HistoryError>;

    /// Up to `limit` entries, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// MongoDB-backed history
pub struct MongoHistory {
    collection: Collection<Document>,
}

impl MongoHistory {
    /// Connect to `uri` and ping the database; an unreachable server is an error
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, HistoryError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.server_selection_timeout = Some(MONGO_TIMEOUT);
        options.connect_timeout = Some(MONGO_TIMEOUT);

        let client = Client::with_options(options)?;
        let database = client.database(database);
        database.run_command(doc! { "ping": 1 }, None).await?;

        Ok(Self {
            collection: database.collection::<Document>(collection),
        })
    }
}

#[async_trait]
impl HistoryStore for MongoHistory {
    async fn insert(&self, record: &PredictionRecord) -> Result<(), HistoryError> {
        let document = bson::to_document(record)?;
        self.collection.insert_one(document, None).await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .limit(limit as i64)
            .build();

        let documents: Vec<Document> = self
            .collection
            .find(None, options)
            .await?
            .try_collect()
            .await?;

        documents.into_iter().map(entry_from_document).collect()
    }
}

/// `_id` becomes its hex string; the remaining fields are the record
fn entry_from_document(document: Document) -> Result<HistoryEntry, HistoryError> {
    let id = match document.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let record: PredictionRecord = bson::from_document(document)?;
    Ok(HistoryEntry { id, record })
}

/// Process-local history
#[derive(Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn insert(&self, record: &PredictionRecord) -> Result<(), HistoryError> {
        let entry = HistoryEntry {
            id: ObjectId::new().to_hex(),
            record: record.clone(),
        };
        self.entries
            .lock()
            .map_err(|_| HistoryError::Poisoned)?
            .push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.entries.lock().map_err(|_| HistoryError::Poisoned)?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str) -> PredictionRecord {
        PredictionRecord {
            image: format!("/srv/uploads/{label}.jpg"),
            label: label.to_string(),
            confidence: 0.5,
            time: "2024-05-01 12:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_newest_first_and_limited() {
        let history = InMemoryHistory::new();
        for i in 0..25 {
            history.insert(&record(&format!("leaf{i}"))).await.unwrap();
        }

        let recent = history.recent(HISTORY_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].record.label, "leaf24");
        assert_eq!(recent[19].record.label, "leaf5");
        assert_eq!(recent[0].id.len(), 24);
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_server_unreachable() {
        let attempt = tokio::time::timeout(
            MONGO_TIMEOUT * 4,
            MongoHistory::connect("mongodb://127.0.0.1:1", "leafscan_test", "history"),
        )
        .await
        .expect("connect should give up within the configured timeout");

        assert!(attempt.is_err());
    }

    #[test]
    fn test_entry_serialises_flat_with_id() {
        let entry = HistoryEntry {
            id: "abc".to_string(),
            record: record("B"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["_id"], "abc");
        assert_eq!(json["label"], "B");
        assert_eq!(json["image"], "/srv/uploads/B.jpg");
    }

    #[test]
    fn test_entry_from_document_renders_object_id() {
        let oid = ObjectId::new();
        let mut document = bson::to_document(&record("A")).unwrap();
        document.insert("_id", oid);

        let entry = entry_from_document(document).unwrap();
        assert_eq!(entry.id, oid.to_hex());
        assert_eq!(entry.record, record("A"));
    }
}
