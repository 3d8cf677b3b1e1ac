//! Access to the video platform: metadata resolution and stream downloads go
//! through yt-dlp, thumbnails through a plain HTTP GET.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::OnceLock,
    time::Duration,
};

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{MetadataError, StreamError};
use crate::metadata::VideoInfo;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_THUMBNAIL_BYTES: u64 = 16 * 1024 * 1024;

/// Substrings of yt-dlp's stderr that mean retrying is pointless.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "has been removed",
    "members-only",
    "members only",
    "sign in to confirm your age",
    "not available in your country",
    "account associated with this video has been terminated",
    "this live event will begin",
];

/// Where video metadata, streams and thumbnails come from.
pub trait RemoteSource: Send + Sync {
    fn resolve(&self, url: &str) -> Result<VideoInfo, MetadataError>;

    /// Downloads a single format of `url` to exactly `dest`.
    fn fetch_format(&self, url: &str, format_id: &str, dest: &Path) -> Result<(), StreamError>;

    fn fetch_thumbnail(&self, url: &str, dest: &Path) -> Result<(), StreamError>;
}

/// Resolves metadata, retrying transient failures up to `policy.attempts`
/// times in total.
pub fn resolve_with_retry<S>(
    source: &S,
    url: &str,
    policy: RetryPolicy,
) -> Result<VideoInfo, MetadataError>
where
    S: RemoteSource + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match source.resolve(url) {
            Ok(info) => return Ok(info),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!("metadata lookup for {url} failed (attempt {attempt}/{attempts}): {err}");
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Shared HTTP agent with consistent timeouts.
fn agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build()
    })
}

/// [`RemoteSource`] backed by the yt-dlp command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    program: PathBuf,
}

impl YtDlpSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist");
        command
    }

    pub fn ensure_available(&self) -> anyhow::Result<()> {
        ensure_program_available(&self.program, "--version")
    }
}

impl RemoteSource for YtDlpSource {
    fn resolve(&self, url: &str) -> Result<VideoInfo, MetadataError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg(url)
            .output()
            .map_err(|err| {
                MetadataError::Transient(format!(
                    "running {}: {err}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(url, &stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| MetadataError::Malformed(format!("metadata for {url}: {err}")))
    }

    fn fetch_format(&self, url: &str, format_id: &str, dest: &Path) -> Result<(), StreamError> {
        let download_error = |message: String| StreamError::Download {
            what: format!("format {format_id}"),
            message,
        };
        let output = self
            .command()
            .arg("--format")
            .arg(format_id)
            .arg("--force-overwrites")
            .arg("--no-part")
            .arg("--output")
            .arg(output_template(dest))
            .arg(url)
            .stdout(Stdio::null())
            .output()
            .map_err(|err| download_error(format!("running {}: {err}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(download_error(format!(
                "exit status {}: {}",
                output.status,
                last_line(&stderr)
            )));
        }
        if !dest.is_file() {
            return Err(download_error(format!(
                "{} was not created",
                dest.display()
            )));
        }
        Ok(())
    }

    fn fetch_thumbnail(&self, url: &str, dest: &Path) -> Result<(), StreamError> {
        let download_error = |message: String| StreamError::Download {
            what: "thumbnail".to_string(),
            message,
        };
        let response = agent()
            .get(url)
            .call()
            .map_err(|err| download_error(format!("GET {url}: {err}")))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_THUMBNAIL_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|err| download_error(format!("reading {url}: {err}")))?;
        fs::write(dest, bytes)
            .map_err(|err| download_error(format!("writing {}: {err}", dest.display())))
    }
}

/// Maps a failed metadata lookup onto retryable vs. permanent.
fn classify_failure(url: &str, stderr: &str) -> MetadataError {
    let lowered = stderr.to_ascii_lowercase();
    let message = format!("{url}: {}", last_line(stderr));
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        MetadataError::Unavailable(message)
    } else {
        MetadataError::Transient(message)
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
}

/// yt-dlp treats `%` in `--output` as a template directive.
fn output_template(dest: &Path) -> String {
    dest.to_string_lossy().replace('%', "%%")
}

/// Runs `<program> <version_flag>` to fail loudly when a tool is missing.
pub fn ensure_program_available(program: &Path, version_flag: &str) -> anyhow::Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => anyhow::bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => anyhow::bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn info(id: &str) -> VideoInfo {
        VideoInfo {
            id: Some(id.into()),
            title: Some(format!("Title {id}")),
            ..VideoInfo::default()
        }
    }

    #[test]
    fn retry_stops_after_configured_attempts() {
        let source = FakeSource::default().with_results("u", vec![Err("timeout".into())]);
        let err = resolve_with_retry(&source, "u", RetryPolicy::default()).unwrap_err();
        assert!(matches!(err, MetadataError::Transient(_)));
        assert_eq!(source.resolve_count("u"), 3);
    }

    #[test]
    fn retry_recovers_from_transient_errors() {
        let source = FakeSource::default().with_results(
            "u",
            vec![Err("timeout".into()), Err("reset".into()), Ok(info("a"))],
        );
        let resolved = resolve_with_retry(&source, "u", RetryPolicy::default()).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a"));
        assert_eq!(source.resolve_count("u"), 3);
    }

    #[test]
    fn retry_never_repeats_unavailable() {
        let source =
            FakeSource::default().with_results("u", vec![Err("unavailable: private".into())]);
        let err = resolve_with_retry(&source, "u", RetryPolicy::default()).unwrap_err();
        assert!(matches!(err, MetadataError::Unavailable(_)));
        assert_eq!(source.resolve_count("u"), 1);
    }

    #[test]
    fn classify_failure_detects_unavailable_videos() {
        let err = classify_failure("u", "ERROR: [youtube] abc: Private video. Sign in\n");
        assert!(matches!(err, MetadataError::Unavailable(_)));
        let err = classify_failure("u", "ERROR: Unable to download webpage: timed out\n");
        assert!(matches!(err, MetadataError::Transient(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn output_template_escapes_percent() {
        assert_eq!(output_template(Path::new("/v/100%_done/vid.mp4")), "/v/100%%_done/vid.mp4");
    }

    #[cfg(unix)]
    fn install_ytdlp_stub(dir: &Path) -> anyhow::Result<PathBuf> {
        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -eu
args=("$@")
output=""
format_id=""
url=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output) shift; output="$1" ;;
    --format) shift; format_id="$1" ;;
    -*) ;;
    *) url="$1" ;;
  esac
  shift
done

if [[ "$url" == *private* ]]; then
  echo "ERROR: [youtube] private: Private video. Sign in if you've been granted access" >&2
  exit 1
fi

if printf '%s\n' "${args[@]}" | grep -q -- '--dump-single-json'; then
  cat <<'JSON'
{
  "id": "alpha",
  "title": "Alpha: The \"Movie\"",
  "description": "Sample description",
  "upload_date": "20240101",
  "thumbnail": "https://i.ytimg.com/vi/alpha/hqdefault.jpg",
  "formats": [
    {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5},
    {"format_id": "137", "ext": "mp4", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "tbr": 1379.2}
  ]
}
JSON
  exit 0
fi

if [[ -n "$format_id" ]]; then
  echo "stream $format_id" > "$output"
  exit 0
fi

exit 0
"#;
        fs::write(&script_path, script)?;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
        Ok(script_path)
    }

    #[cfg(unix)]
    #[test]
    fn ytdlp_source_parses_metadata() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = YtDlpSource::new(install_ytdlp_stub(dir.path())?);
        let info = source.resolve("https://youtu.be/alpha")?;
        assert_eq!(info.id.as_deref(), Some("alpha"));
        assert_eq!(info.title.as_deref(), Some("Alpha: The \"Movie\""));
        assert_eq!(info.formats.len(), 2);
        assert!(info.formats[0].is_audio_only());
        assert!(info.formats[1].is_video_only());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn ytdlp_source_reports_private_videos_as_unavailable() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = YtDlpSource::new(install_ytdlp_stub(dir.path())?);
        let err = source.resolve("https://youtu.be/private").unwrap_err();
        assert!(matches!(err, MetadataError::Unavailable(_)));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn ytdlp_source_downloads_to_exact_path() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = YtDlpSource::new(install_ytdlp_stub(dir.path())?);
        let folder = dir.path().join("Alpha_The_Movie");
        fs::create_dir_all(&folder)?;
        let dest = folder.join("vid_only.mp4");
        source
            .fetch_format("https://youtu.be/alpha", "137", &dest)?;
        assert_eq!(fs::read_to_string(&dest)?, "stream 137\n");
        Ok(())
    }

    #[test]
    fn missing_program_is_reported() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let err = ensure_program_available(&dir.path().join("nope"), "--version").unwrap_err();
        assert!(err.to_string().contains("not installed"));
        Ok(())
    }
}
