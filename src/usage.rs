//! Usage accounting across a stream.
//!
//! [`record_usage`] re-streams engine output, sums every `usage` event
//! (one per provider turn inside the agentic loop) and hands exactly one
//! [`UsageRecord`] to the sink when the stream terminates. The on-disk log
//! itself is the caller's concern; [`UsageSink`] is the seam.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::stream::EventStream;
use crate::types::{Event, Usage};

/// One accounting entry for a completed stream.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub timestamp_secs: u64,
    pub provider: String,
    pub model: String,
    /// Which credential served the call, for externally tracked billing
    pub credential: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// Receiver for completed usage records.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// In-memory sink, for tests and for callers that flush in batches.
#[derive(Default)]
pub struct MemoryUsageSink {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl UsageSink for MemoryUsageSink {
    fn record(&self, record: UsageRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Wrap a stream so the sink receives one record when it terminates,
/// whether by `done`, error, or the producer going away.
pub fn record_usage(
    mut inner: EventStream,
    sink: Arc<dyn UsageSink>,
    provider: impl Into<String>,
    model: impl Into<String>,
    credential: impl Into<String>,
) -> EventStream {
    let provider = provider.into();
    let model = model.into();
    let credential = credential.into();

    EventStream::spawn(move |tx| async move {
        let mut total = Usage::default();

        while let Some(item) = inner.recv().await {
            match item {
                Ok(event) => {
                    if let Event::Usage(usage) = &event {
                        total.add(usage);
                    }
                    if !tx.send(event).await {
                        break;
                    }
                }
                Err(e) => {
                    tx.fail(e).await;
                    break;
                }
            }
        }

        let record = UsageRecord {
            timestamp_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            provider,
            model,
            credential,
            input_tokens: total.input_tokens,
            output_tokens: total.output_tokens,
            cache_read: total.cached_input_tokens,
            cache_write: total.cache_write_tokens,
        };
        log::debug!(
            "usage: {} {} in={} out={} cache_read={}",
            record.provider,
            record.model,
            record.input_tokens,
            record.output_tokens,
            record.cache_read
        );
        sink.record(record);
    })
}
