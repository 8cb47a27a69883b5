//! # Chunked history reader.
//!
//! Reads the run's append log back in chunks whose size adapts to the
//! observed item size, so no single request approaches the store's
//! per-request ceiling, and stops once the accumulated bytes would pass
//! `max_bytes`.
//!
//! ```text
//! length(key)                              ──► Err propagates
//! loop over [start, end]:
//!   range(cursor, cursor + chunk - 1)      ──► Err: partial result
//!   accept items while total + len <= max  ──► over: partial result
//!   chunk = ChunkPolicy::next_size(bytes, items)
//! ```

use tracing::{debug, warn};

use crate::config::{ChunkPolicy, Config};
use crate::error::StoreError;
use crate::run::RunEvent;
use crate::transport::TransportRef;

/// Size-bounded reader over a list in the store.
pub struct ChunkedReader {
    transport: TransportRef,
    max_bytes: u64,
    chunks: ChunkPolicy,
}

impl ChunkedReader {
    pub fn new(transport: TransportRef, cfg: &Config) -> Self {
        Self::with_limits(transport, cfg.read_max_bytes, cfg.chunks)
    }

    pub fn with_limits(transport: TransportRef, max_bytes: u64, chunks: ChunkPolicy) -> Self {
        Self {
            transport,
            max_bytes,
            chunks,
        }
    }

    /// Whole list, oldest first, up to the byte ceiling.
    pub async fn read_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.read_range(key, 0, None).await
    }

    /// The last `max_count` items, oldest first, up to the byte ceiling.
    pub async fn read_latest(&self, key: &str, max_count: u64) -> Result<Vec<String>, StoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let len = self.transport.length(key).await?;
        self.read_range(key, len.saturating_sub(max_count), None).await
    }

    /// Items `start..=end` (`end = None` reads to the tail).
    ///
    /// Only the initial length lookup propagates its error. A failed chunk
    /// or the byte ceiling ends the read with whatever was collected.
    pub async fn read_range(
        &self,
        key: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<String>, StoreError> {
        let len = self.transport.length(key).await?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let last = end.map_or(len - 1, |end| end.min(len - 1));
        if start > last {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut total: u64 = 0;
        let mut cursor = start;
        let mut chunk = self.chunks.initial.max(1);

        while cursor <= last {
            let chunk_end = (cursor + chunk - 1).min(last);
            let items = match self.transport.range(key, cursor, chunk_end).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(key, offset = cursor, error = %err, "chunk read failed, returning partial history");
                    break;
                }
            };
            if items.is_empty() {
                break;
            }

            let count = items.len() as u64;
            let mut chunk_bytes: u64 = 0;
            for item in items {
                let size = item.len() as u64;
                if total + size > self.max_bytes {
                    warn!(
                        key,
                        items = out.len(),
                        bytes = total,
                        limit = self.max_bytes,
                        "history read hit its size ceiling, returning partial history"
                    );
                    return Ok(out);
                }
                total += size;
                chunk_bytes += size;
                out.push(item);
            }

            cursor += count;
            chunk = self.chunks.next_size(chunk_bytes, count);
        }

        debug!(key, items = out.len(), bytes = total, "history read");
        Ok(out)
    }

    /// Whole list decoded as events; entries that fail to decode are skipped.
    pub async fn read_events(&self, key: &str) -> Result<Vec<RunEvent>, StoreError> {
        let raw = self.read_all(key).await?;
        Ok(decode_events(&raw))
    }
}

/// Decodes serialized events, skipping (and logging) malformed entries.
pub fn decode_events(raw: &[String]) -> Vec<RunEvent> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, item)| match RunEvent::from_json(item) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(index, error = %err, "skipping undecodable history entry");
                None
            }
        })
        .collect()
}
