//! Product-URL persistence: per-domain stores draining through a
//! size-bounded chunked writer.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

pub const DEFAULT_MAX_CHUNK_BYTES: usize = 5 * 1024 * 1024;

/// Rolling text sink. Writes land in `<prefix>_<chunk:04d>.txt`; a new
/// chunk is started whenever appending the next write would push the
/// current file past the byte cap, so a single write is never split and a
/// closed chunk never exceeds the cap (unless one write alone does).
pub struct ChunkedWriter {
    prefix: PathBuf,
    max_chunk_bytes: usize,
    current: Option<BufWriter<File>>,
    current_size: usize,
    chunk: u32,
}

impl ChunkedWriter {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> Self {
        Self::with_max_chunk_bytes(prefix, DEFAULT_MAX_CHUNK_BYTES)
    }

    pub fn with_max_chunk_bytes<P: Into<PathBuf>>(prefix: P, max_chunk_bytes: usize) -> Self {
        Self {
            prefix: prefix.into(),
            max_chunk_bytes,
            current: None,
            current_size: 0,
            chunk: 0,
        }
    }

    /// Append `data` to the current chunk, rolling over first if needed.
    /// Size accounting is in bytes on both sides of the cap check.
    pub async fn write(&mut self, data: &str) -> Result<()> {
        if self.current.is_none() || self.current_size + data.len() > self.max_chunk_bytes {
            self.roll().await?;
        }

        if let Some(file) = self.current.as_mut() {
            file.write_all(data.as_bytes()).await?;
            self.current_size += data.len();
        }

        Ok(())
    }

    /// Close the current chunk and open the next one, creating the parent
    /// directory on first use. An existing file under the same name is
    /// truncated.
    async fn roll(&mut self) -> Result<()> {
        self.close().await?;

        self.chunk += 1;
        let filename = PathBuf::from(format!("{}_{:04}.txt", self.prefix.display(), self.chunk));

        if let Some(parent) = filename.parent() {
            // A bare prefix has an empty parent; nothing to create then.
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(&filename)
            .await
            .with_context(|| format!("failed to create chunk file {}", filename.display()))?;
        self.current = Some(BufWriter::new(file));
        self.current_size = 0;

        Ok(())
    }

    /// Flush and close the current chunk if one is open. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.current.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

/// Per-domain product bookkeeping. `seen` backs the flush threshold for
/// the current window and is cleared per flush; `buffer` holds URLs
/// pending flush in arrival order; `total` and `flushes` survive the whole
/// run and feed the summaries.
#[derive(Default)]
struct DomainStore {
    seen: HashSet<String>,
    buffer: VecDeque<String>,
    flushes: usize,
    total: usize,
}

/// Streaming sink for product URLs, keyed by host. Buffers hits per domain
/// and flushes them to chunked files once the threshold is reached.
pub(crate) struct ProductSink {
    output_dir: PathBuf,
    threshold: usize,
    stores: Mutex<IndexMap<String, DomainStore>>,
}

impl ProductSink {
    pub(crate) fn new(output_dir: PathBuf, threshold: usize) -> Self {
        Self {
            output_dir,
            threshold: threshold.max(1),
            stores: Mutex::new(IndexMap::new()),
        }
    }

    /// Record a product hit for `host`, flushing its buffer once the
    /// current window reaches the threshold.
    pub(crate) async fn add(&self, host: &str, url: &str) -> Result<()> {
        let mut stores = self.stores.lock().await;
        let store = stores.entry(host.to_string()).or_insert_with(DomainStore::default);

        store.seen.insert(url.to_string());
        store.buffer.push_back(url.to_string());
        store.total += 1;

        if store.seen.len() >= self.threshold {
            Self::flush_store(&self.output_dir, host, store).await?;
        }

        Ok(())
    }

    /// Drain every remaining buffer. A host that never yielded a product
    /// gets the `processed.txt` marker instead of product files.
    pub(crate) async fn finish<'a, I>(&self, seeds: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut stores = self.stores.lock().await;
        for (host, seed) in seeds {
            let store = stores.entry(host.to_string()).or_insert_with(DomainStore::default);

            if store.total == 0 {
                let folder = self.output_dir.join(host);
                fs::create_dir_all(&folder).await.with_context(|| {
                    format!("failed to create directory {}", folder.display())
                })?;
                let path = folder.join("processed.txt");
                fs::write(
                    &path,
                    format!("Processed domain: {seed}\nNo product URLs found.\n"),
                )
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            } else {
                Self::flush_store(&self.output_dir, host, store).await?;
            }
        }
        Ok(())
    }

    /// Flush counters per host, for the run summary.
    pub(crate) async fn flush_counts(&self) -> IndexMap<String, usize> {
        self.stores
            .lock()
            .await
            .iter()
            .map(|(host, store)| (host.clone(), store.flushes))
            .collect()
    }

    async fn flush_store(output_dir: &Path, host: &str, store: &mut DomainStore) -> Result<()> {
        if store.buffer.is_empty() {
            return Ok(());
        }

        let drained = store.buffer.len();
        let prefix = output_dir
            .join(host)
            .join(format!("product_urls_{:04}", store.flushes));

        let mut writer = ChunkedWriter::new(prefix);
        while let Some(url) = store.buffer.pop_front() {
            writer.write(&format!("{url}\n")).await?;
        }
        writer.close().await?;

        store.flushes += 1;
        store.seen.clear();

        tracing::info!(host, drained, "flushed product URLs");
        Ok(())
    }
}
