//! On-disk storage for uploaded companion skins.
//!
//! Each companion has at most one custom skin, `skin_<id>.png` inside the
//! skins directory. A new upload replaces the old file atomically.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use {tracing::info, uuid::Uuid};

use crate::error::{GatewayError, GatewayResult};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

#[derive(Debug, Clone)]
pub struct SkinStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl SkinStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("skin_{id}.png"))
    }

    /// Validate and persist a custom skin, returning where it was stored.
    pub async fn store(&self, id: Uuid, bytes: Vec<u8>) -> GatewayResult<PathBuf> {
        if bytes.len() > self.max_bytes {
            return Err(GatewayError::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }
        if !is_png(&bytes) {
            return Err(GatewayError::MalformedBody("Skin file must be a PNG image".into()));
        }

        let dir = self.dir.clone();
        let path = self.path_for(id);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(GatewayError::internal)?
            .map_err(GatewayError::internal)?;

        info!(companion = %id, path = %path.display(), "stored custom skin");
        Ok(path)
    }

    /// Delete the stored custom skin. Returns whether a file existed.
    pub async fn remove(&self, id: Uuid) -> GatewayResult<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => {
                info!(companion = %id, "removed custom skin");
                Ok(true)
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GatewayError::internal(e)),
        }
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
