//! Gallery construction from image folders.
//!
//! Two layouts are supported:
//! - labeled dataset: `root/<label>/<image>`, nested to any depth; the
//!   image's parent directory name is its label;
//! - roster folder: `root/<label>.<ext>`, one image per identity.

use crate::analyzer::{embed_primary, load_rgb, EmbedOutcome, FaceAnalyzer};
use crate::error::MatchError;
use crate::gallery::{Gallery, GalleryEntry};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("worker pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Gallery(#[from] MatchError),
}

/// An image that contributed nothing to the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// Gallery plus a summary of what happened to every image.
#[derive(Debug)]
pub struct DatasetReport {
    pub gallery: Gallery,
    /// Entries whose embedding came from the whole-image fallback.
    pub fallback: Vec<PathBuf>,
    pub skipped: Vec<SkippedImage>,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Image files found under a dataset root.
#[derive(Debug, Default)]
pub struct ImageListing {
    /// Sorted by path.
    pub images: Vec<PathBuf>,
    /// Directory entries that could not be read.
    pub unreadable: Vec<SkippedImage>,
}

/// Every image file under `root`, sorted by path.
///
/// Symlinked directories are not descended into, so a link back up the
/// tree cannot list the same image twice.
pub fn find_images(root: &Path) -> Result<ImageListing, DatasetError> {
    let mut listing = ImageListing::default();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| DatasetError::ReadDir {
            path: dir.clone(),
            source,
        })?;
        for entry in readable_entries(&dir, entries, &mut listing.unreadable) {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => pending.push(path),
                Ok(kind) if kind.is_symlink() && path.is_dir() => {
                    tracing::debug!(path = %path.display(), "not following directory symlink");
                }
                Ok(_) if is_image_file(&path) => listing.images.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                    listing.unreadable.push(SkippedImage {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    listing.images.sort();
    Ok(listing)
}

/// Unwrap directory entries, recording each failed one as skipped.
pub fn readable_entries<T>(
    dir: &Path,
    entries: impl IntoIterator<Item = std::io::Result<T>>,
    skipped: &mut Vec<SkippedImage>,
) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "unreadable directory entry, skipping");
                skipped.push(SkippedImage {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                });
                None
            }
        })
        .collect()
}

/// Label of a dataset image: the name of its parent directory.
pub fn dataset_label(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

/// Label of a roster image: the file name without its extension.
pub fn roster_label(path: &Path) -> Option<String> {
    path.file_stem()?.to_str().map(str::to_string)
}

/// Embed every image of a labeled dataset on a pool of `analyzers.len()`
/// worker threads, one analyzer per thread.
///
/// Entries are inserted in path order whatever order the workers finish in.
/// Unreadable images and images neither stage could embed are skipped and
/// reported; they never abort the batch.
pub fn embed_dataset<A>(root: &Path, analyzers: Vec<A>) -> Result<DatasetReport, DatasetError>
where
    A: FaceAnalyzer + Send,
{
    let ImageListing {
        images: paths,
        unreadable,
    } = find_images(root)?;
    tracing::info!(root = %root.display(), images = paths.len(), workers = analyzers.len(), "embedding dataset");

    let outcomes = run_pool(&paths, analyzers, |analyzer, path| {
        load_rgb(path)
            .map(|image| embed_primary(analyzer, &image))
            .unwrap_or_else(|e| EmbedOutcome::Failed(e.to_string()))
    })?;

    let mut entries = Vec::with_capacity(paths.len());
    let mut fallback = Vec::new();
    let mut skipped = unreadable;
    for (path, outcome) in paths.into_iter().zip(outcomes) {
        let Some(label) = dataset_label(&path) else {
            skipped.push(SkippedImage {
                path,
                reason: "no label directory".into(),
            });
            continue;
        };
        if let EmbedOutcome::FallbackUsed(_) = outcome {
            tracing::debug!(path = %path.display(), "fallback embedding used");
            fallback.push(path.clone());
        }
        match outcome {
            EmbedOutcome::Failed(reason) => {
                tracing::warn!(path = %path.display(), %reason, "failed to embed, skipping");
                skipped.push(SkippedImage { path, reason });
            }
            outcome => {
                if let Some(embedding) = outcome.into_embedding() {
                    entries.push(GalleryEntry::new(label, embedding).with_source(path));
                }
            }
        }
    }

    let gallery = Gallery::build(entries)?;
    tracing::info!(
        embedded = gallery.len(),
        fallback = fallback.len(),
        skipped = skipped.len(),
        "dataset embedded"
    );
    Ok(DatasetReport {
        gallery,
        fallback,
        skipped,
    })
}

/// Embed a roster folder: one image per identity, label = file stem.
///
/// Only detected faces count; an image without a usable detection is
/// skipped. Two files with the same stem fail with `DuplicateIdentity`.
pub fn embed_roster<A: FaceAnalyzer + ?Sized>(
    dir: &Path,
    analyzer: &mut A,
) -> Result<DatasetReport, DatasetError> {
    let entries_iter = std::fs::read_dir(dir).map_err(|source| DatasetError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut skipped = Vec::new();
    let mut paths: Vec<PathBuf> = readable_entries(dir, entries_iter, &mut skipped)
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(label) = roster_label(&path) else {
            skipped.push(SkippedImage {
                path,
                reason: "file name is not valid UTF-8".into(),
            });
            continue;
        };
        let image = match load_rgb(&path) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "roster image unreadable, skipping");
                skipped.push(SkippedImage {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let detected = match analyzer.detect(&image) {
            Ok(faces) => faces.into_iter().find_map(|f| f.usable_embedding().cloned()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "roster detection failed");
                None
            }
        };
        match detected {
            Some(embedding) => entries.push(GalleryEntry::new(label, embedding).with_source(path)),
            None => {
                tracing::warn!(path = %path.display(), "no face in roster image, skipping");
                skipped.push(SkippedImage {
                    path,
                    reason: "no face detected".into(),
                });
            }
        }
    }

    let gallery = Gallery::build_roster(entries)?;
    tracing::info!(dir = %dir.display(), identities = gallery.len(), skipped = skipped.len(), "roster loaded");
    Ok(DatasetReport {
        gallery,
        fallback: Vec::new(),
        skipped,
    })
}

/// Run `work` over `items` on a dedicated pool, giving each worker thread
/// exclusive use of its own analyzer. Results come back in input order.
fn run_pool<A, T, R, F>(items: &[T], analyzers: Vec<A>, work: F) -> Result<Vec<R>, DatasetError>
where
    A: Send,
    T: Sync,
    R: Send,
    F: Fn(&mut A, &T) -> R + Sync,
{
    if analyzers.is_empty() {
        return Err(DatasetError::Pool("at least one analyzer is required".into()));
    }
    let slots: Vec<Mutex<A>> = analyzers.into_iter().map(Mutex::new).collect();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(slots.len())
        .thread_name(|i| format!("rollcall-embed-{i}"))
        .build()
        .map_err(|e| DatasetError::Pool(e.to_string()))?;

    Ok(pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                let slot = rayon::current_thread_index().unwrap_or(0) % slots.len();
                let mut analyzer = slots[slot].lock().unwrap_or_else(PoisonError::into_inner);
                work(&mut *analyzer, item)
            })
            .collect()
    }))
}
