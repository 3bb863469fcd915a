//! Override samples for the training-data collector.
//!
//! The queue only writes samples to `override_outbox`; [`FeedbackRelay`] moves
//! them to whatever sink is wired in and marks them delivered afterwards.

use crate::errors::{EngineError, Result};
use crate::model::Decision;
use crate::queue::HumanDecision;
use crate::storage::Store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideSample {
    pub queue_id: String,
    pub tenant_id: String,
    pub utterance: String,
    pub expected_outcome: String,
    pub automated_label: Decision,
    pub human_decision: HumanDecision,
    pub locale: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub sample: OverrideSample,
    pub created_at: String,
}

#[async_trait]
pub trait OverrideSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, batch: &[OverrideSample]) -> anyhow::Result<()>;
}

/// In-process hand-off to a collector task.
pub struct ChannelSink {
    tx: mpsc::Sender<OverrideSample>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OverrideSample>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OverrideSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn deliver(&self, batch: &[OverrideSample]) -> anyhow::Result<()> {
        for s in batch {
            self.tx
                .send(s.clone())
                .await
                .map_err(|_| anyhow::anyhow!("override collector channel closed"))?;
        }
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OverrideSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn deliver(&self, batch: &[OverrideSample]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for s in batch {
            buf.push_str(&serde_json::to_string(s)?);
            buf.push('\n');
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(buf.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

/// POSTs each batch as a JSON array to a collector endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl OverrideSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, batch: &[OverrideSample]) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(batch)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct FeedbackRelay {
    store: Store,
    sink: Arc<dyn OverrideSink>,
    batch_size: u32,
}

impl FeedbackRelay {
    pub fn new(store: Store, sink: Arc<dyn OverrideSink>) -> Self {
        Self {
            store,
            sink,
            batch_size: 100,
        }
    }

    pub fn with_batch_size(mut self, n: u32) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Delivers every undelivered sample. Rows are marked only after the sink
    /// accepted them, so a failed run is simply repeated later.
    pub async fn drain(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let entries = self.store.pending_overrides(self.batch_size)?;
            if entries.is_empty() {
                break;
            }
            let batch: Vec<OverrideSample> = entries.iter().map(|e| e.sample.clone()).collect();
            self.sink.deliver(&batch).await.map_err(|e| {
                tracing::warn!(
                    event = "voxgate.feedback.delivery_failed",
                    sink = self.sink.name(),
                    error = %e,
                    "override delivery failed"
                );
                EngineError::Delivery(e.to_string())
            })?;
            let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
            self.store.mark_overrides_delivered(&ids)?;
            delivered += ids.len();
        }
        if delivered > 0 {
            tracing::info!(
                event = "voxgate.feedback.relayed",
                sink = self.sink.name(),
                count = delivered,
                "override samples delivered"
            );
        }
        Ok(delivered)
    }
}
