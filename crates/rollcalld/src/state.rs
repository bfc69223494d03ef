use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::error::ApiResult;
use rollcall_core::attendance::{AttendanceBook, ObservedImage};
use rollcall_core::dataset::{is_image_file, readable_entries, DatasetError, SkippedImage};
use rollcall_core::{DetectedFace, Gallery, MatchError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Shared daemon state.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub book: AttendanceBook,
    /// `None` until a roster with at least one usable face is loaded.
    roster: RwLock<Option<Arc<Gallery>>>,
    /// Number of the last stored upload. Held from reserving a name until
    /// the observation is recorded, and for the whole of a reset.
    last_photo: Mutex<usize>,
}

/// Outcome of a roster (re)load.
#[derive(Debug)]
pub struct RosterReload {
    pub loaded: usize,
    pub skipped: Vec<SkippedImage>,
}

impl AppState {
    pub fn new(config: Config, engine: EngineHandle) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.upload_dir)?;
        std::fs::create_dir_all(&config.roster_dir)?;
        let last_photo = highest_photo_number(&list_uploads(&config.upload_dir)?);
        Ok(Self {
            config,
            engine,
            book: AttendanceBook::new(),
            roster: RwLock::new(None),
            last_photo: Mutex::new(last_photo),
        })
    }

    /// Current roster; readers keep their `Arc` even if a reload swaps it.
    pub fn roster(&self) -> Option<Arc<Gallery>> {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap_roster(&self, roster: Option<Gallery>) {
        *self.roster.write().unwrap_or_else(PoisonError::into_inner) = roster.map(Arc::new);
    }

    /// Re-embed the roster folder on the engine thread and swap it in.
    ///
    /// A folder without a single usable face clears the roster. Any other
    /// failure (e.g. duplicate names) keeps the previous roster.
    pub async fn reload_roster(&self) -> ApiResult<RosterReload> {
        match self.engine.load_roster(self.config.roster_dir.clone()).await {
            Ok(report) => {
                let loaded = report.gallery.len();
                tracing::info!(
                    dir = %self.config.roster_dir.display(),
                    loaded,
                    skipped = report.skipped.len(),
                    "roster swapped in"
                );
                self.swap_roster(Some(report.gallery));
                Ok(RosterReload {
                    loaded,
                    skipped: report.skipped,
                })
            }
            Err(EngineError::Dataset(DatasetError::Gallery(MatchError::EmptyGallery))) => {
                tracing::warn!(dir = %self.config.roster_dir.display(), "roster folder has no usable faces");
                self.swap_roster(None);
                Ok(RosterReload {
                    loaded: 0,
                    skipped: Vec::new(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store an analyzed upload as the next `photo_{n}.jpg` and record its
    /// faces. Returns the stored path.
    pub async fn store_upload(&self, bytes: &[u8], faces: Vec<DetectedFace>) -> ApiResult<String> {
        let mut last_photo = self.last_photo.lock().await;
        let n = *last_photo + 1;
        let path = self.config.upload_dir.join(format!("photo_{n}.jpg"));
        tokio::fs::write(&path, bytes).await?;
        *last_photo = n;

        let filename = path.display().to_string();
        self.book.observe(ObservedImage {
            image_id: filename.clone(),
            faces,
        });
        Ok(filename)
    }

    /// Delete every stored upload and forget all observations.
    pub async fn reset_photos(&self) -> ApiResult<usize> {
        let mut last_photo = self.last_photo.lock().await;
        let uploads = list_uploads(&self.config.upload_dir)?;
        for path in &uploads {
            tokio::fs::remove_file(path).await?;
        }
        self.book.reset_observations();
        *last_photo = 0;
        tracing::info!(removed = uploads.len(), "uploads reset");
        Ok(uploads.len())
    }

    /// Re-detect photos already in the upload folder, so a restart keeps the
    /// current session. Unreadable files are logged and skipped.
    pub async fn restore_uploads(&self) -> ApiResult<usize> {
        let mut restored = 0;
        for path in list_uploads(&self.config.upload_dir)? {
            if !is_image_file(&path) {
                continue;
            }
            let name = path.display().to_string();
            let bytes = tokio::fs::read(&path).await?;
            match self.engine.analyze(&name, bytes).await {
                Ok(faces) => {
                    self.book.observe(ObservedImage { image_id: name, faces });
                    restored += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping stored upload"),
            }
        }
        if restored > 0 {
            tracing::info!(restored, "restored observations from upload folder");
        }
        Ok(restored)
    }
}

/// Largest `n` among `photo_{n}.*` names, so new uploads never overwrite.
fn highest_photo_number(paths: &[PathBuf]) -> usize {
    paths
        .iter()
        .filter_map(|p| p.file_stem()?.to_str()?.strip_prefix("photo_")?.parse().ok())
        .max()
        .unwrap_or(0)
}

/// Regular files in the upload folder, sorted. Unreadable entries are
/// logged and left out.
fn list_uploads(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut unreadable = Vec::new();
    let mut files: Vec<PathBuf> = readable_entries(dir, std::fs::read_dir(dir)?, &mut unreadable)
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_photo_number() {
        let paths: Vec<PathBuf> = ["photo_2.jpg", "photo_10.jpg", "notes.txt", "photo_x.jpg"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(highest_photo_number(&paths), 10);
        assert_eq!(highest_photo_number(&[]), 0);
    }
}
