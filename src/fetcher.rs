//! Per-identifier download: metadata, folder, text files, streams, mux.

use std::{
    fs, io,
    path::Path,
};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::assembler::Assembler;
use crate::config::{RetryPolicy, RuntimeConfig};
use crate::error::{AssemblyError, StreamError};
use crate::metadata::{
    VideoInfo, VideoJob, select_audio_format, select_video_format, upgrade_thumbnail_url,
};
use crate::source::{RemoteSource, resolve_with_retry};
use crate::store::{
    AUDIO_STREAM_FILE, DESCRIPTION_FILE, FolderStore, SOURCE_FILE, THUMBNAIL_FILE, TITLE_FILE,
    VIDEO_STREAM_FILE,
};

/// What happened to one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// `vid.mp4` was assembled in a new folder.
    Downloaded,
    /// A folder for the same video already existed; nothing was touched.
    AlreadyPresent,
    /// A different video already owns the sanitized folder name.
    Collision,
    /// Metadata could not be resolved; no folder was created.
    Unavailable,
    /// A download step failed. The partial folder is left for `clean`.
    Failed(String),
    /// Muxing failed and the folder was deleted.
    Discarded,
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::AlreadyPresent => "already present",
            Self::Collision => "collision",
            Self::Unavailable => "unavailable",
            Self::Failed(_) => "failed",
            Self::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub max_height: u32,
    pub audio_kbps: u32,
}

pub struct VideoFetcher<S> {
    source: S,
    assembler: Assembler,
    store: FolderStore,
    retry: RetryPolicy,
    limits: StreamLimits,
}

impl<S: RemoteSource> VideoFetcher<S> {
    pub fn new(
        source: S,
        assembler: Assembler,
        store: FolderStore,
        retry: RetryPolicy,
        limits: StreamLimits,
    ) -> Self {
        Self {
            source,
            assembler,
            store,
            retry,
            limits,
        }
    }

    pub fn from_config(source: S, config: &RuntimeConfig) -> Self {
        Self::new(
            source,
            Assembler::new(&config.ffmpeg),
            FolderStore::new(&config.output_root),
            config.retry,
            StreamLimits {
                max_height: config.max_height,
                audio_kbps: config.audio_kbps,
            },
        )
    }

    pub fn store(&self) -> &FolderStore {
        &self.store
    }

    pub fn assembler(&self) -> &Assembler {
        &self.assembler
    }

    /// Runs the whole download sequence for `url`. Never panics on remote or
    /// filesystem failures; every failure maps onto an outcome.
    pub fn process(&self, url: &str) -> FetchOutcome {
        let info = match resolve_with_retry(&self.source, url, self.retry) {
            Ok(info) => info,
            Err(err) => {
                warn!("skipping {url}: {err}");
                return FetchOutcome::Unavailable;
            }
        };
        let job = match VideoJob::from_info(url, &info) {
            Ok(job) => job,
            Err(err) => {
                warn!("skipping {url}: {err}");
                return FetchOutcome::Unavailable;
            }
        };

        let folder = self.store.folder(&job.folder_name);
        match claim_folder(self.store.root(), &folder) {
            Ok(true) => {}
            Ok(false) => return existing_folder_outcome(&folder, &job),
            Err(err) => {
                warn!("{url}: {err:#}");
                return FetchOutcome::Failed(format!("{err:#}"));
            }
        }

        info!("downloading {} into {}", url, folder.display());
        if let Err(err) = self.download_into(&folder, &job, &info) {
            warn!("{url}: {err:#}; leaving {} for cleanup", folder.display());
            return FetchOutcome::Failed(format!("{err:#}"));
        }

        match self.assembler.assemble(&folder) {
            Ok(()) => {}
            // vid.mp4 was written; a leftover stream file does not spoil it.
            Err(err @ AssemblyError::Cleanup { .. }) => warn!("{url}: {err}"),
            Err(_) => {
                if let Err(err) = fs::remove_dir_all(&folder) {
                    warn!("could not discard {}: {err}", folder.display());
                }
                return FetchOutcome::Discarded;
            }
        }

        info!("finished {}", job.folder_name);
        FetchOutcome::Downloaded
    }

    fn download_into(&self, folder: &Path, job: &VideoJob, info: &VideoInfo) -> Result<()> {
        if let Some(thumbnail_url) = job.thumbnail_url.as_deref() {
            self.fetch_thumbnail(thumbnail_url, &folder.join(THUMBNAIL_FILE));
        }

        write_text(&folder.join(DESCRIPTION_FILE), &job.description_text())?;
        write_text(&folder.join(TITLE_FILE), &job.title)?;
        write_text(
            &folder.join(SOURCE_FILE),
            &format!("{}\n{}\n", job.url, job.video_id),
        )?;

        let video = select_video_format(&info.formats, self.limits.max_height)
            .and_then(|format| format.format_id.as_deref())
            .ok_or(StreamError::Unavailable { kind: "video" })?;
        self.source
            .fetch_format(&job.url, video, &folder.join(VIDEO_STREAM_FILE))?;

        match select_audio_format(&info.formats, self.limits.audio_kbps)
            .and_then(|format| format.format_id.as_deref())
        {
            Some(audio) => self
                .source
                .fetch_format(&job.url, audio, &folder.join(AUDIO_STREAM_FILE))?,
            None => warn!("{}: no audio-only stream, continuing without audio", job.url),
        }
        Ok(())
    }

    /// Tries the max-resolution variant first, then the reported URL. A
    /// missing thumbnail does not fail the video.
    fn fetch_thumbnail(&self, url: &str, dest: &Path) {
        let upgraded = upgrade_thumbnail_url(url);
        if upgraded != url && self.source.fetch_thumbnail(&upgraded, dest).is_ok() {
            return;
        }
        if let Err(err) = self.source.fetch_thumbnail(url, dest) {
            warn!("{err}; continuing without thumbnail");
        }
    }
}

/// Creates the folder atomically. `Ok(false)` means it already existed,
/// either from an earlier run or another worker.
fn claim_folder(root: &Path, folder: &Path) -> Result<bool> {
    fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
    match fs::create_dir(folder) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("creating {}", folder.display())),
    }
}

fn existing_folder_outcome(folder: &Path, job: &VideoJob) -> FetchOutcome {
    let recorded = fs::read_to_string(folder.join(SOURCE_FILE)).unwrap_or_default();
    let mut lines = recorded.lines().map(str::trim);
    let recorded_url = lines.next().unwrap_or_default();
    let recorded_id = lines.next().unwrap_or_default();

    let same_video = recorded_url.is_empty()
        || recorded_id == job.video_id
        || (recorded_id.is_empty() && recorded_url == job.url);
    if same_video {
        info!("{} already present, skipping", job.folder_name);
        FetchOutcome::AlreadyPresent
    } else {
        warn!(
            "{} ({}) maps to folder {} already used by {}",
            job.url,
            job.video_id,
            folder.display(),
            recorded_url
        );
        FetchOutcome::Collision
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}
