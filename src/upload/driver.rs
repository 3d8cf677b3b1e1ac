//! Walks pending folders and hands each one to a studio session.

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{error, info, warn};

use super::secrets::Secrets;
use crate::error::UploadError;
use crate::store::{DESCRIPTION_FILE, FolderStore, THUMBNAIL_FILE, TITLE_FILE, VIDEO_FILE};

/// A browser-driven upload backend.
pub trait StudioSession {
    fn login(&mut self, studio_url: &str, secrets: &Secrets) -> Result<(), UploadError>;

    fn upload(&mut self, job: &UploadJob) -> Result<(), UploadError>;

    fn close(&mut self) -> Result<(), UploadError>;
}

/// Inputs for one upload, read from a complete folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub folder: PathBuf,
    pub video: PathBuf,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<PathBuf>,
}

#[derive(Debug)]
pub enum JobInput {
    Ready(UploadJob),
    /// No `vid.mp4`; the folder is marked `noupload`.
    MissingVideo,
    /// Title or description absent; retried on a later run.
    MissingText(PathBuf),
}

impl UploadJob {
    pub fn load(folder: &Path) -> Result<JobInput, UploadError> {
        let video = folder.join(VIDEO_FILE);
        if !video.is_file() {
            return Ok(JobInput::MissingVideo);
        }
        let Some(title) = read_optional(&folder.join(TITLE_FILE))? else {
            return Ok(JobInput::MissingText(folder.join(TITLE_FILE)));
        };
        let Some(description) = read_optional(&folder.join(DESCRIPTION_FILE))? else {
            return Ok(JobInput::MissingText(folder.join(DESCRIPTION_FILE)));
        };
        let thumbnail = Some(folder.join(THUMBNAIL_FILE)).filter(|path| path.is_file());

        Ok(JobInput::Ready(Self {
            folder: folder.to_path_buf(),
            video,
            title: title.trim().to_string(),
            description,
            thumbnail,
        }))
    }

    /// Folder name, used in log lines and screenshot names.
    pub fn name(&self) -> String {
        self.folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, UploadError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(UploadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// Marked `noupload` during this run.
    pub skipped: usize,
    /// Left unmarked because text inputs were missing.
    pub deferred: usize,
    /// Set when a session-level error stopped the run early.
    pub aborted: Option<String>,
}

pub struct UploadDriver {
    secrets: Secrets,
    batch_size: usize,
    batch_pause: Duration,
}

impl UploadDriver {
    pub fn new(secrets: Secrets, batch_size: usize, batch_pause: Duration) -> Self {
        Self {
            secrets,
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    /// Logs in once and uploads every pending folder in batches. A login
    /// failure is returned as an error; a later session-level failure stops
    /// the run and is recorded in [`UploadReport::aborted`].
    pub fn run<S>(&self, session: &mut S, store: &FolderStore) -> Result<UploadReport, UploadError>
    where
        S: StudioSession + ?Sized,
    {
        let batches = store
            .pending_batches(self.batch_size)
            .map_err(|err| UploadError::Store(format!("{err:#}")))?;
        let mut report = UploadReport::default();
        if batches.is_empty() {
            info!("nothing to upload in {}", store.root().display());
            return Ok(report);
        }

        let studio_url = self.secrets.studio_url();
        info!("logging in to {studio_url}");
        if let Err(err) = session.login(&studio_url, &self.secrets) {
            close_quietly(session);
            return Err(err);
        }

        'batches: for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.batch_pause.is_zero() {
                info!("pausing {}s before the next batch", self.batch_pause.as_secs());
                thread::sleep(self.batch_pause);
            }
            for folder in batch {
                if let Err(err) = self.upload_folder(session, folder, &mut report) {
                    error!("stopping uploads: {err}");
                    report.aborted = Some(err.to_string());
                    break 'batches;
                }
            }
        }

        close_quietly(session);
        info!(
            "uploads finished: {} uploaded, {} failed, {} marked noupload, {} deferred",
            report.uploaded, report.failed, report.skipped, report.deferred
        );
        Ok(report)
    }

    /// Returns an error only for failures that end the run.
    fn upload_folder<S>(
        &self,
        session: &mut S,
        folder: &Path,
        report: &mut UploadReport,
    ) -> Result<(), UploadError>
    where
        S: StudioSession + ?Sized,
    {
        let job = match UploadJob::load(folder) {
            Ok(JobInput::Ready(job)) => job,
            Ok(JobInput::MissingVideo) => {
                warn!("{} has no {VIDEO_FILE}; marking noupload", folder.display());
                FolderStore::mark_skipped(folder)
                    .map_err(|err| UploadError::Store(format!("{err:#}")))?;
                report.skipped += 1;
                return Ok(());
            }
            Ok(JobInput::MissingText(path)) => {
                warn!("could not locate {}; skipping for now", path.display());
                report.deferred += 1;
                return Ok(());
            }
            Err(err) => {
                warn!("{err}");
                report.failed += 1;
                return Ok(());
            }
        };

        info!("uploading {}", job.title);
        match session.upload(&job) {
            Ok(()) => {
                FolderStore::mark_uploaded(folder)
                    .map_err(|err| UploadError::Store(format!("{err:#}")))?;
                report.uploaded += 1;
                Ok(())
            }
            Err(err) if err.is_session_level() => Err(err),
            Err(err) => {
                warn!("upload of {} failed: {err}", job.name());
                report.failed += 1;
                Ok(())
            }
        }
    }
}

fn close_quietly<S>(session: &mut S)
where
    S: StudioSession + ?Sized,
{
    if let Err(err) = session.close() {
        warn!("closing browser session: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FolderStatus, SKIPPED_MARKER, UPLOADED_MARKER};
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Scripted session: uploads succeed unless the folder name has an entry
    /// in `failures`.
    #[derive(Default)]
    struct FakeSession {
        login_error: Option<String>,
        failures: HashMap<String, UploadError>,
        logins: usize,
        uploads: Vec<String>,
        closed: bool,
    }

    impl StudioSession for FakeSession {
        fn login(&mut self, _studio_url: &str, _secrets: &Secrets) -> Result<(), UploadError> {
            self.logins += 1;
            match &self.login_error {
                Some(message) => Err(UploadError::Session(message.clone())),
                None => Ok(()),
            }
        }

        fn upload(&mut self, job: &UploadJob) -> Result<(), UploadError> {
            let name = job.name();
            self.uploads.push(name.clone());
            match self.failures.remove(&name) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn close(&mut self) -> Result<(), UploadError> {
            self.closed = true;
            Ok(())
        }
    }

    fn secrets() -> Secrets {
        Secrets::parse(r#"{"link": "UC1", "user": "me", "pass": "pw"}"#).unwrap()
    }

    fn driver() -> UploadDriver {
        UploadDriver::new(secrets(), 2, Duration::ZERO)
    }

    fn ready_folder(root: &Path, name: &str) -> anyhow::Result<PathBuf> {
        let folder = root.join(name);
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(VIDEO_FILE), "video")?;
        fs::write(folder.join(TITLE_FILE), format!("{name}\n"))?;
        fs::write(folder.join(DESCRIPTION_FILE), "desc")?;
        Ok(folder)
    }

    #[test]
    fn successful_uploads_are_marked() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let a = ready_folder(dir.path(), "a")?;
        let b = ready_folder(dir.path(), "b")?;
        let c = ready_folder(dir.path(), "c")?;
        let mut session = FakeSession::default();

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report.uploaded, 3);
        assert_eq!(session.logins, 1);
        assert!(session.closed);
        assert_eq!(session.uploads, vec!["a", "b", "c"]);
        for folder in [a, b, c] {
            assert_eq!(FolderStore::status(&folder), FolderStatus::Uploaded);
        }
        Ok(())
    }

    #[test]
    fn ui_failure_leaves_folder_pending_and_continues() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let a = ready_folder(dir.path(), "a")?;
        let b = ready_folder(dir.path(), "b")?;
        let mut session = FakeSession::default();
        session
            .failures
            .insert("a".into(), UploadError::ui("title", "no such element"));

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert!(!a.join(UPLOADED_MARKER).exists());
        assert!(!a.join(SKIPPED_MARKER).exists());
        assert!(b.join(UPLOADED_MARKER).exists());
        assert_eq!(store.pending()?, vec![a]);
        Ok(())
    }

    #[test]
    fn session_failure_stops_the_run() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        for name in ["a", "b", "c"] {
            ready_folder(dir.path(), name)?;
        }
        let mut session = FakeSession::default();
        session.failures.insert("b".into(), UploadError::LimitReached);

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report.uploaded, 1);
        assert_eq!(session.uploads, vec!["a", "b"]);
        assert_eq!(report.aborted.as_deref(), Some("daily upload limit reached"));
        assert!(session.closed);
        assert_eq!(store.pending()?.len(), 2);
        Ok(())
    }

    #[test]
    fn login_failure_is_returned() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        ready_folder(dir.path(), "a")?;
        let mut session = FakeSession {
            login_error: Some("bad password".into()),
            ..FakeSession::default()
        };

        let err = driver().run(&mut session, &store).unwrap_err();

        assert!(matches!(err, UploadError::Session(_)));
        assert!(session.uploads.is_empty());
        assert!(session.closed);
        Ok(())
    }

    #[test]
    fn missing_video_marks_noupload() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let folder = dir.path().join("empty");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join(TITLE_FILE), "t")?;
        let mut session = FakeSession::default();

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report.skipped, 1);
        assert!(folder.join(SKIPPED_MARKER).exists());
        assert!(session.uploads.is_empty());
        Ok(())
    }

    #[test]
    fn missing_text_defers_without_marker() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let folder = ready_folder(dir.path(), "notext")?;
        fs::remove_file(folder.join(DESCRIPTION_FILE))?;
        let mut session = FakeSession::default();

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report.deferred, 1);
        assert_eq!(FolderStore::status(&folder), FolderStatus::Pending);
        Ok(())
    }

    #[test]
    fn marked_folders_are_not_uploaded_again() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FolderStore::new(dir.path());
        let done = ready_folder(dir.path(), "done")?;
        FolderStore::mark_uploaded(&done)?;
        let mut session = FakeSession::default();

        let report = driver().run(&mut session, &store)?;

        assert_eq!(report, UploadReport::default());
        assert_eq!(session.logins, 0);
        Ok(())
    }

    #[test]
    fn load_reads_inputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let folder = ready_folder(dir.path(), "clip")?;
        fs::write(folder.join(THUMBNAIL_FILE), "png")?;

        let JobInput::Ready(job) = UploadJob::load(&folder)? else {
            panic!("expected a ready job");
        };
        assert_eq!(job.title, "clip");
        assert_eq!(job.description, "desc");
        assert_eq!(job.thumbnail, Some(folder.join(THUMBNAIL_FILE)));
        assert_eq!(job.name(), "clip");
        Ok(())
    }
}
