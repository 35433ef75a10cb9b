use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::platform;

pub const DEFAULT_TITLE: &str = "Slideshow";
pub const DEFAULT_IMAGE_REGEX: &str = r#"<img src="([^"]+)""#;
pub const DEFAULT_TITLE_REGEX: &str = r"<title>([^<]+)</title>";
pub const GOOGLE_PHOTOS_REGEX: &str = r"https://lh3\.googleusercontent\.com/pw/[a-zA-Z0-9_\-/]+";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub show: ShowConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    /// Falls back to the folder name in folder mode, else [`DEFAULT_TITLE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Seconds per slide at speed 1.
    #[serde(default = "default_image_duration")]
    pub image_duration: f64,
    /// Seconds between source refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Resolve each slide's media type so cast receivers can pick a player.
    #[serde(default = "default_true")]
    pub support_casting: bool,
}

/// Where slide URLs come from. Selected by `mode` in the `[source]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A literal list, optionally extended by a file with one URL per line.
    Urls {
        #[serde(default)]
        urls: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        urls_file: Option<PathBuf>,
        /// Known media types, so they never need resolving.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        content_types: BTreeMap<String, String>,
    },
    /// Media files in a local folder, served by the daemon itself.
    Folder {
        #[serde(default = "default_folder")]
        folder: PathBuf,
    },
    /// Scrape a web page with a regex.
    Page {
        url: String,
        #[serde(default = "default_image_regex")]
        regex: String,
        #[serde(default = "default_true")]
        parse_title: bool,
        #[serde(default = "default_title_regex")]
        title_regex: String,
    },
    /// A publicly shared Google Photos album (page scrape with the album pattern).
    GooglePhotos {
        url: String,
        #[serde(default = "default_google_photos_regex")]
        regex: String,
        #[serde(default = "default_true")]
        parse_title: bool,
        #[serde(default = "default_title_regex")]
        title_regex: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host name viewers use to reach us. Detected from the LAN interface when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
    /// Extra folders to serve, e.g. assets referenced by a URL list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_folders: Vec<StaticFolder>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticFolder {
    pub route: String,
    pub path: PathBuf,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            title: None,
            image_duration: default_image_duration(),
            refresh_interval: default_refresh_interval(),
            support_casting: default_true(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Folder {
            folder: default_folder(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_host: None,
            static_folders: Vec::new(),
        }
    }
}

fn default_image_duration() -> f64 {
    4.0
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_folder() -> PathBuf {
    PathBuf::from(".")
}

fn default_image_regex() -> String {
    DEFAULT_IMAGE_REGEX.to_string()
}

fn default_title_regex() -> String {
    DEFAULT_TITLE_REGEX.to_string()
}

fn default_google_photos_regex() -> String {
    GOOGLE_PHOTOS_REGEX.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl SourceConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            SourceConfig::Urls { .. } => "urls",
            SourceConfig::Folder { .. } => "folder",
            SourceConfig::Page { .. } => "page",
            SourceConfig::GooglePhotos { .. } => "google_photos",
        }
    }

    /// The slide folder the HTTP layer must serve, in folder mode.
    pub fn slide_folder(&self) -> Option<&Path> {
        match self {
            SourceConfig::Folder { folder } => Some(folder),
            _ => None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Title shown before (or instead of) anything the source reports.
    pub fn initial_title(&self) -> String {
        if let Some(title) = &self.show.title {
            return title.clone();
        }
        if let SourceConfig::Folder { folder } = &self.source {
            let name = std::fs::canonicalize(folder)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
            if let Some(name) = name {
                return name;
            }
        }
        DEFAULT_TITLE.to_string()
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.show.image_duration.is_finite() && self.show.image_duration > 0.0) {
            anyhow::bail!(
                "show.image_duration must be a positive number of seconds, got {}",
                self.show.image_duration
            );
        }
        if self.show.refresh_interval == 0 {
            anyhow::bail!("show.refresh_interval must be at least 1 second");
        }

        match &self.source {
            SourceConfig::Urls {
                urls, urls_file, ..
            } => {
                if urls.is_empty() && urls_file.is_none() {
                    anyhow::bail!("source.mode = \"urls\" needs `urls` or `urls_file`");
                }
            }
            SourceConfig::Folder { folder } => {
                if !folder.is_dir() {
                    anyhow::bail!("{} does not exist or is not a folder", folder.display());
                }
            }
            SourceConfig::Page {
                url,
                regex,
                title_regex,
                ..
            }
            | SourceConfig::GooglePhotos {
                url,
                regex,
                title_regex,
                ..
            } => {
                if url.trim().is_empty() {
                    anyhow::bail!("source.url is required for mode {:?}", self.source.mode());
                }
                regex::Regex::new(regex).context("invalid source.regex")?;
                regex::Regex::new(title_regex).context("invalid source.title_regex")?;
            }
        }

        for mount in &self.http.static_folders {
            if !mount.route.starts_with('/') {
                anyhow::bail!("static folder route {:?} must start with '/'", mount.route);
            }
            if !mount.path.is_dir() {
                anyhow::bail!("static folder {} does not exist", mount.path.display());
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            show: ShowConfig::default(),
            source: SourceConfig::default(),
            http: HttpConfig::default(),
        }
    }
}
