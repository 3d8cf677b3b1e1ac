//! Video metadata as reported by `yt-dlp --dump-single-json`, plus the
//! helpers that turn it into folder names, text files and stream choices.
//!
//! Every field is optional because older or unusual videos omit metadata.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

use crate::error::MetadataError;

/// Characters that never make it into a folder name.
const UNSAFE_TITLE_CHARS: &[char] = &[
    '"', '*', '\\', '/', '\'', '.', '|', '?', ':', '<', '>', '!', '(', ')', '+', ',', '[', ']',
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub thumbnail: Option<String>,
    pub live_status: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    /// Audio bitrate in kbit/s.
    pub abr: Option<f64>,
    /// Total bitrate in kbit/s.
    pub tbr: Option<f64>,
}

impl FormatInfo {
    fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video() && !self.has_audio()
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    pub fn is_combined(&self) -> bool {
        self.has_video() && self.has_audio()
    }
}

// yt-dlp reports a missing track as the literal string "none"; an absent
// field means the extractor did not say.
fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.eq_ignore_ascii_case("none"))
}

/// Everything the fetcher needs to know about one identifier once metadata
/// resolution succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJob {
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub folder_name: String,
    pub publish_date: Option<String>,
    pub description: String,
    pub thumbnail_url: Option<String>,
}

impl VideoJob {
    pub fn from_info(url: &str, info: &VideoInfo) -> Result<Self, MetadataError> {
        if let Some(status) = info.live_status.as_deref()
            && matches!(status, "is_live" | "is_upcoming")
        {
            return Err(MetadataError::Unavailable(format!(
                "{url} is a live or upcoming stream ({status})"
            )));
        }

        let video_id = info
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| MetadataError::Malformed(format!("no video id reported for {url}")))?;
        let title = info
            .title
            .as_deref()
            .or(info.fulltitle.as_deref())
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(&video_id)
            .to_owned();

        let mut folder_name = sanitize_title(&title);
        if folder_name.is_empty() {
            folder_name = sanitize_title(&video_id);
        }
        if folder_name.is_empty() {
            return Err(MetadataError::Malformed(format!(
                "no usable folder name for {url}"
            )));
        }

        Ok(Self {
            url: url.to_owned(),
            video_id,
            title,
            folder_name,
            publish_date: info.upload_date.as_deref().and_then(format_publish_date),
            description: info.description.clone().unwrap_or_default(),
            thumbnail_url: info.thumbnail.clone().filter(|url| !url.is_empty()),
        })
    }

    /// Body of `desc.txt`.
    pub fn description_text(&self) -> String {
        compose_description(self.publish_date.as_deref(), &self.description)
    }
}

/// Longest folder name produced, in bytes. Stays well under `NAME_MAX`.
pub const MAX_FOLDER_NAME_BYTES: usize = 200;

/// Drops filesystem-unsafe punctuation and control characters, joins the
/// remaining words with single underscores and cuts the result to
/// [`MAX_FOLDER_NAME_BYTES`] on a char boundary.
pub fn sanitize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !UNSAFE_TITLE_CHARS.contains(c) && !c.is_control() || c.is_whitespace())
        .collect();
    let mut name = stripped.split_whitespace().collect::<Vec<_>>().join("_");
    if name.len() > MAX_FOLDER_NAME_BYTES {
        let mut cut = MAX_FOLDER_NAME_BYTES;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        name.truncate(name.trim_end_matches('_').len());
    }
    name
}

/// Turns yt-dlp's `YYYYMMDD` into e.g. `January 2, 2024`.
pub fn format_publish_date(value: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok()?;
    Some(date.format("%B %-d, %Y").to_string())
}

pub fn compose_description(publish_date: Option<&str>, description: &str) -> String {
    let body = if description.trim().is_empty() {
        "No description.".to_string()
    } else {
        format!("Original description:\n{description}")
    };
    match publish_date {
        Some(date) => format!("Uploaded on {date}\n{body}\n"),
        None => format!("{body}\n"),
    }
}

/// Swaps the low-resolution thumbnail variants for `maxresdefault`. The
/// result equals the input when no known variant is present.
pub fn upgrade_thumbnail_url(url: &str) -> String {
    static VARIANT: OnceLock<Option<Regex>> = OnceLock::new();
    let variant = VARIANT.get_or_init(|| Regex::new(r"(sddefault|hqdefault|mqdefault)").ok());
    match variant {
        Some(pattern) => pattern.replace_all(url, "maxresdefault").into_owned(),
        None => url.to_owned(),
    }
}

/// Picks the tallest video-only stream not exceeding `max_height`, falling
/// back to the best combined stream.
pub fn select_video_format(formats: &[FormatInfo], max_height: u32) -> Option<&FormatInfo> {
    let rank = |format: &&FormatInfo| (format.height.unwrap_or(0), bitrate_key(format.tbr));
    formats
        .iter()
        .filter(|format| format.format_id.is_some() && format.is_video_only())
        .filter(|format| format.height.is_some_and(|height| height <= max_height))
        .max_by_key(rank)
        .or_else(|| {
            formats
                .iter()
                .filter(|format| format.format_id.is_some() && format.is_combined())
                .max_by_key(rank)
        })
}

/// Picks the audio-only stream whose bitrate is closest to `target_kbps`.
/// Ties prefer `m4a`, which muxes into mp4 without re-encoding.
pub fn select_audio_format(formats: &[FormatInfo], target_kbps: u32) -> Option<&FormatInfo> {
    let target = f64::from(target_kbps);
    formats
        .iter()
        .filter(|format| format.format_id.is_some() && format.is_audio_only())
        .min_by_key(|format| {
            let distance = format
                .abr
                .or(format.tbr)
                .map(|abr| (abr - target).abs())
                .unwrap_or(f64::MAX);
            let not_m4a = format.ext.as_deref() != Some("m4a");
            (bitrate_key(Some(distance)), not_m4a)
        })
}

fn bitrate_key(value: Option<f64>) -> u64 {
    value
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| (value * 1000.0) as u64)
        .unwrap_or(u64::MAX)
}
