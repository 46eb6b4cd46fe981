use crate::app::ports::{PayloadStorePort, StoredPayload};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const REF_PREFIX: &str = "cas:sha256:";

/// Filesystem content-addressed store: `<root>/sha256/ab/cd/<hex>`
pub struct FsPayloadStore {
    root: PathBuf,
}

impl FsPayloadStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn path_for_hex(&self, hex: &str) -> PathBuf {
        self.root.join("sha256").join(&hex[0..2]).join(&hex[2..4]).join(hex)
    }

    pub fn resolve(&self, payload_ref: &str) -> Result<PathBuf> {
        let hex = payload_ref
            .strip_prefix(REF_PREFIX)
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| PipelineError::MissingField(format!("bad payload ref '{}'", payload_ref)))?;
        Ok(self.path_for_hex(hex))
    }
}

#[async_trait]
impl PayloadStorePort for FsPayloadStore {
    async fn put(&self, bytes: &[u8]) -> Result<StoredPayload> {
        let hex = hex::encode(Sha256::digest(bytes));
        let path = self.path_for_hex(&hex);
        let already_present = tokio::fs::try_exists(&path).await?;
        if !already_present {
            write_then_rename(&path, bytes).await?;
        }
        Ok(StoredPayload { payload_ref: format!("{}{}", REF_PREFIX, hex), already_present })
    }

    async fn get(&self, payload_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(payload_ref)?;
        Ok(tokio::fs::read(path).await?)
    }
}

/// Only complete payloads ever appear under their content address; an
/// interrupted write leaves a stray temp file, never a truncated payload.
async fn write_then_rename(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stores_bytes_once_and_unmodified() {
        let dir = tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let bytes = b"author,text\nann,\"great, really\"\r\n";

        let first = store.put(bytes).await.unwrap();
        assert!(!first.already_present);
        assert!(first.payload_ref.starts_with("cas:sha256:"));

        let second = store.put(bytes).await.unwrap();
        assert!(second.already_present);
        assert_eq!(first.payload_ref, second.payload_ref);

        assert_eq!(store.get(&first.payload_ref).await.unwrap(), bytes.to_vec());
    }

    #[tokio::test]
    async fn interrupted_write_is_not_a_stored_payload() {
        let dir = tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let bytes = b"text\nloved it\n";
        let hex = hex::encode(Sha256::digest(bytes));
        let path = store.path_for_hex(&hex);

        // leftover from a write that never finished
        let shard = path.parent().unwrap();
        std::fs::create_dir_all(shard).unwrap();
        std::fs::write(shard.join(format!(".{}.dead.tmp", hex)), b"tex").unwrap();

        let stored = store.put(bytes).await.unwrap();
        assert!(!stored.already_present);
        assert_eq!(std::fs::read(&path).unwrap(), bytes.to_vec());

        let names: Vec<String> = std::fs::read_dir(shard)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| !n.ends_with(".dead.tmp"))
            .collect();
        assert_eq!(names, vec![hex]);
    }

    #[tokio::test]
    async fn rejects_malformed_refs() {
        let store = FsPayloadStore::new("unused");
        assert!(store.get("sha256:abc").await.is_err());
        assert!(store.get("cas:sha256:../../etc/passwd").await.is_err());
    }
}
