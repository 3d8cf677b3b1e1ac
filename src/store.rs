//! On-disk job state: one folder per video under the output root, with
//! marker files recording what the uploader did with it.
//!
//! ```text
//! <root>/<sanitized_title>/
//!     vid_only.mp4   video stream, removed after assembly
//!     aud_only.mp3   audio stream, removed after assembly
//!     vid.mp4        assembled output; its absence means "incomplete"
//!     thumb.png  title.txt  desc.txt  source.txt
//!     uploaded | noupload
//! ```

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const VIDEO_STREAM_FILE: &str = "vid_only.mp4";
pub const AUDIO_STREAM_FILE: &str = "aud_only.mp3";
pub const VIDEO_FILE: &str = "vid.mp4";
pub const THUMBNAIL_FILE: &str = "thumb.png";
pub const TITLE_FILE: &str = "title.txt";
pub const DESCRIPTION_FILE: &str = "desc.txt";
pub const SOURCE_FILE: &str = "source.txt";
pub const UPLOADED_MARKER: &str = "uploaded";
pub const SKIPPED_MARKER: &str = "noupload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    /// No assembled video; removed by [`FolderStore::clean`].
    Incomplete,
    Pending,
    Uploaded,
    Skipped,
    /// Both markers present. Never selected for upload.
    Conflicted,
}

impl FolderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Skipped => "noupload",
            Self::Conflicted => "conflicted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub incomplete: usize,
    pub pending: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub conflicted: usize,
}

impl StoreSummary {
    pub fn total(&self) -> usize {
        self.incomplete + self.pending + self.uploaded + self.skipped + self.conflicted
    }
}

#[derive(Debug, Clone)]
pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))
    }

    pub fn folder(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Immediate subdirectories of the root, sorted by name. A missing root
    /// has no folders.
    pub fn folders(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut folders = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("listing {}", self.root.display()))?;
            if entry.file_type().is_dir() {
                folders.push(entry.into_path());
            }
        }
        Ok(folders)
    }

    pub fn status(folder: &Path) -> FolderStatus {
        if !folder.join(VIDEO_FILE).is_file() {
            return FolderStatus::Incomplete;
        }
        let uploaded = folder.join(UPLOADED_MARKER).exists();
        let skipped = folder.join(SKIPPED_MARKER).exists();
        match (uploaded, skipped) {
            (true, true) => FolderStatus::Conflicted,
            (true, false) => FolderStatus::Uploaded,
            (false, true) => FolderStatus::Skipped,
            (false, false) => FolderStatus::Pending,
        }
    }

    /// Deletes every folder that lacks an assembled video and returns the
    /// removed paths.
    pub fn clean(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for folder in self.folders()? {
            if Self::status(&folder) != FolderStatus::Incomplete {
                continue;
            }
            match fs::remove_dir_all(&folder) {
                Ok(()) => {
                    info!("removed incomplete folder {}", folder.display());
                    removed.push(folder);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("removing {}", folder.display()));
                }
            }
        }
        Ok(removed)
    }

    /// Folders with neither marker, sorted by name. Run [`clean`](Self::clean)
    /// first so incomplete folders are gone.
    pub fn pending(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .folders()?
            .into_iter()
            .filter(|folder| {
                !folder.join(UPLOADED_MARKER).exists() && !folder.join(SKIPPED_MARKER).exists()
            })
            .collect())
    }

    /// [`pending`](Self::pending) split into groups of `size` for paced
    /// uploading.
    pub fn pending_batches(&self, size: usize) -> Result<Vec<Vec<PathBuf>>> {
        let pending = self.pending()?;
        Ok(pending
            .chunks(size.max(1))
            .map(<[PathBuf]>::to_vec)
            .collect())
    }

    pub fn mark_uploaded(folder: &Path) -> Result<()> {
        touch(&folder.join(UPLOADED_MARKER))
    }

    pub fn mark_skipped(folder: &Path) -> Result<()> {
        touch(&folder.join(SKIPPED_MARKER))
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let mut summary = StoreSummary::default();
        for folder in self.folders()? {
            match Self::status(&folder) {
                FolderStatus::Incomplete => summary.incomplete += 1,
                FolderStatus::Pending => summary.pending += 1,
                FolderStatus::Uploaded => summary.uploaded += 1,
                FolderStatus::Skipped => summary.skipped += 1,
                FolderStatus::Conflicted => {
                    warn!("{} carries both markers", folder.display());
                    summary.conflicted += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Creates an empty marker file; an existing marker is left as is.
fn touch(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .with_context(|| format!("writing marker {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn complete_folder(root: &Path, name: &str) -> Result<PathBuf> {
        let folder = root.join(name);
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_FILE), "video")?;
        Ok(folder)
    }

    #[test]
    fn missing_root_has_no_folders() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path().join("videos"));
        assert!(store.folders()?.is_empty());
        assert!(store.clean()?.is_empty());
        Ok(())
    }

    #[test]
    fn folders_lists_only_direct_subdirectories() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        complete_folder(dir.path(), "b")?;
        complete_folder(dir.path(), "a")?;
        fs::create_dir_all(dir.path().join("a").join("nested"))?;
        fs::write(dir.path().join("stray.txt"), "x")?;

        let names: Vec<_> = store
            .folders()?
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn clean_removes_only_incomplete_folders() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let kept = complete_folder(dir.path(), "Done")?;
        let partial = dir.path().join("Partial");
        fs::create_dir_all(&partial)?;
        fs::write(partial.join(VIDEO_STREAM_FILE), "half")?;
        fs::write(partial.join(TITLE_FILE), "Partial")?;

        let removed = store.clean()?;

        assert_eq!(removed, vec![partial.clone()]);
        assert!(!partial.exists());
        assert!(kept.join(VIDEO_FILE).exists());
        Ok(())
    }

    #[test]
    fn pending_excludes_marked_folders() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let fresh = complete_folder(dir.path(), "Fresh")?;
        let uploaded = complete_folder(dir.path(), "Uploaded")?;
        let skipped = complete_folder(dir.path(), "Skipped")?;
        FolderStore::mark_uploaded(&uploaded)?;
        FolderStore::mark_skipped(&skipped)?;

        assert_eq!(store.pending()?, vec![fresh.clone()]);
        assert_eq!(FolderStore::status(&fresh), FolderStatus::Pending);
        assert_eq!(FolderStore::status(&uploaded), FolderStatus::Uploaded);
        assert_eq!(FolderStore::status(&skipped), FolderStatus::Skipped);
        Ok(())
    }

    #[test]
    fn both_markers_are_reported_as_conflicted() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let folder = complete_folder(dir.path(), "Both")?;
        FolderStore::mark_uploaded(&folder)?;
        FolderStore::mark_skipped(&folder)?;

        assert_eq!(FolderStore::status(&folder), FolderStatus::Conflicted);
        assert!(store.pending()?.is_empty());
        assert_eq!(store.summary()?.conflicted, 1);
        Ok(())
    }

    #[test]
    fn marking_twice_is_a_no_op() -> Result<()> {
        let dir = tempdir()?;
        let folder = complete_folder(dir.path(), "Twice")?;
        FolderStore::mark_uploaded(&folder)?;
        FolderStore::mark_uploaded(&folder)?;
        assert_eq!(fs::read(folder.join(UPLOADED_MARKER))?.len(), 0);
        Ok(())
    }

    #[test]
    fn pending_batches_groups_by_size() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            complete_folder(dir.path(), name)?;
        }
        let batches = store.pending_batches(3)?;
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(store.pending_batches(0)?.iter().all(|b| b.len() == 1));
        Ok(())
    }

    #[test]
    fn summary_counts_each_state() -> Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        complete_folder(dir.path(), "pending")?;
        FolderStore::mark_uploaded(&complete_folder(dir.path(), "up")?)?;
        fs::create_dir_all(dir.path().join("partial"))?;

        let summary = store.summary()?;
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.incomplete, 1);
        assert_eq!(summary.total(), 3);
        Ok(())
    }
}
