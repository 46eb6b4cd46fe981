use crate::app::ports::IngestLogPort;
use crate::error::Result;
use crate::pipeline::ingestion::IngestEntry;
use crate::pipeline::storage;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// NDJSON file implementation of the ingest log
pub struct FileIngestLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileIngestLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl IngestLogPort for FileIngestLog {
    async fn append(&self, entry: &IngestEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        storage::append_ndjson(&self.path, entry)
    }

    async fn entries(&self) -> Result<Vec<IngestEntry>> {
        storage::read_ndjson(&self.path)
    }
}
