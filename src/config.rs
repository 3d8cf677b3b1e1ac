#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_OUTPUT_SUBDIR: &str = "videos";
pub const DEFAULT_JOB_LIST: &str = "videos.txt";
pub const DEFAULT_SECRETS: &str = "secrets.json";
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_PAUSE_SECS: u64 = 10;
pub const DEFAULT_METADATA_RETRIES: usize = 3;
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;
pub const DEFAULT_AUDIO_KBPS: u32 = 160;
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// Every tunable the download and upload phases read. Built once per run and
/// handed to each component.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub output_root: PathBuf,
    pub job_list: PathBuf,
    pub secrets_path: PathBuf,
    pub workers: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub retry: RetryPolicy,
    pub max_height: u32,
    pub audio_kbps: u32,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub webdriver_url: String,
    pub screenshot_dir: Option<PathBuf>,
}

/// Bounded retry for metadata lookups. A zero delay retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_METADATA_RETRIES,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub output_root: Option<PathBuf>,
    pub job_list: Option<PathBuf>,
    pub secrets_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub batch_pause_secs: Option<u64>,
    pub webdriver_url: Option<String>,
    pub env_path: Option<PathBuf>,
}

/// Command-line overrides shared by every binary.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Directory holding one folder per video.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Newline-delimited list of video URLs.
    #[arg(long, value_name = "FILE")]
    pub job_list: Option<PathBuf>,
    /// JSON file with the channel link and login.
    #[arg(long, value_name = "FILE")]
    pub secrets: Option<PathBuf>,
    /// Download workers (defaults to the number of cores).
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Seconds to wait between upload batches.
    #[arg(long, value_name = "SECS")]
    pub batch_pause: Option<u64>,
    #[arg(long, value_name = "URL")]
    pub webdriver_url: Option<String>,
    /// Alternate `.env` file.
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(self) -> Result<RuntimeConfig> {
        resolve_runtime_config(RuntimeOverrides {
            output_root: self.output_dir,
            job_list: self.job_list,
            secrets_path: self.secrets,
            workers: self.workers,
            batch_size: self.batch_size,
            batch_pause_secs: self.batch_pause,
            webdriver_url: self.webdriver_url,
            env_path: self.env_file,
        })
    }
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    let cwd = env::current_dir().context("resolving current directory")?;
    Ok(build_runtime_config(&file_vars, env_var_string, &cwd, overrides))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    cwd: &Path,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let parsed = |key: &str| lookup(key).and_then(|value| value.parse::<u64>().ok());

    let output_root = overrides
        .output_root
        .or_else(|| lookup("REUPLOAD_OUTPUT_DIR").map(PathBuf::from))
        .unwrap_or_else(|| cwd.join(DEFAULT_OUTPUT_SUBDIR));
    let job_list = overrides
        .job_list
        .or_else(|| lookup("REUPLOAD_JOB_LIST").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_JOB_LIST));
    let secrets_path = overrides
        .secrets_path
        .or_else(|| lookup("REUPLOAD_SECRETS").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS));
    let workers = overrides
        .workers
        .or_else(|| parsed("REUPLOAD_WORKERS").map(|value| value as usize))
        .filter(|value| *value > 0)
        .unwrap_or_else(default_worker_count);
    let batch_size = overrides
        .batch_size
        .or_else(|| parsed("REUPLOAD_BATCH_SIZE").map(|value| value as usize))
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let batch_pause = Duration::from_secs(
        overrides
            .batch_pause_secs
            .or_else(|| parsed("REUPLOAD_BATCH_PAUSE_SECS"))
            .unwrap_or(DEFAULT_BATCH_PAUSE_SECS),
    );
    let retry = RetryPolicy {
        attempts: parsed("REUPLOAD_METADATA_RETRIES")
            .map(|value| value as usize)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_METADATA_RETRIES),
        delay: Duration::from_millis(parsed("REUPLOAD_RETRY_DELAY_MS").unwrap_or(0)),
    };
    let max_height = parsed("REUPLOAD_MAX_HEIGHT")
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(DEFAULT_MAX_HEIGHT);
    let audio_kbps = parsed("REUPLOAD_AUDIO_KBPS")
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(DEFAULT_AUDIO_KBPS);
    let yt_dlp = lookup("REUPLOAD_YT_DLP")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let ffmpeg = lookup("REUPLOAD_FFMPEG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));
    let webdriver_url = overrides
        .webdriver_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("REUPLOAD_WEBDRIVER_URL"))
        .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());
    let screenshot_dir = lookup("REUPLOAD_SCREENSHOT_DIR").map(PathBuf::from);

    RuntimeConfig {
        output_root,
        job_list,
        secrets_path,
        workers,
        batch_size,
        batch_pause,
        retry,
        max_height,
        audio_kbps,
        yt_dlp,
        ffmpeg,
        webdriver_url,
        screenshot_dir,
    }
}

/// Logical core count of the host, never below one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
