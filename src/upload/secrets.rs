//! Channel credentials read from `secrets.json`.

use std::{fmt, fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

const STUDIO_CHANNEL_PREFIX: &str = "https://studio.youtube.com/channel/";

/// Accepts either key spelling: `link`/`channel`, `username`/`user`,
/// `password`/`pass`.
#[derive(Clone, Deserialize)]
pub struct Secrets {
    #[serde(alias = "channel")]
    pub link: String,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(alias = "pass")]
    pub password: String,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("link", &self.link)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading secrets file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing secrets file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let secrets: Secrets = serde_json::from_str(raw)?;
        Ok(secrets)
    }

    pub fn studio_url(&self) -> String {
        studio_url(&self.link)
    }
}

/// Maps a public channel link or a bare channel id onto the studio page.
pub fn studio_url(link: &str) -> String {
    let link = link.trim();
    if link.contains("studio.youtube.com/") {
        return link.to_string();
    }
    if let Some((_, rest)) = link.split_once("youtube.com/channel/") {
        let id = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if !id.is_empty() {
            return format!("{STUDIO_CHANNEL_PREFIX}{id}");
        }
    }
    format!("{STUDIO_CHANNEL_PREFIX}{link}")
}
