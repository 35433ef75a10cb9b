//! Slide URL acquisition.
//!
//! Every strategy is re-run on each refresh tick and returns the complete
//! current URL set. None of them touch the playlist; the core merges the
//! result.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, Url};
use slide_proto::config::{Config, SourceConfig};
use tracing::debug;

use crate::content_type::{is_media_file, Lookup};
use crate::error::FetchError;

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// One successful refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub urls: Vec<String>,
    /// A title reported by the source, e.g. an album name.
    pub title: Option<String>,
}

pub trait SourceFetcher: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<FetchOutcome, FetchError>> + Send;

    /// Shown to viewers as the `source` notice.
    fn identifier(&self) -> String;
}

/// The configured strategy.
#[derive(Debug)]
pub enum Source {
    Urls(UrlListSource),
    Folder(FolderSource),
    Page(PageSource),
}

impl Source {
    /// Build the strategy selected by `[source]`. `public_base_url` is where
    /// viewers reach this daemon, used for folder-mode slide URLs.
    pub fn from_config(config: &Config, public_base_url: &str) -> Result<Self, FetchError> {
        let source = match &config.source {
            SourceConfig::Urls {
                urls, urls_file, ..
            } => Source::Urls(UrlListSource::new(urls.clone(), urls_file.clone())),
            SourceConfig::Folder { folder } => {
                Source::Folder(FolderSource::new(folder.clone(), public_base_url)?)
            }
            SourceConfig::Page {
                url,
                regex,
                parse_title,
                title_regex,
            }
            | SourceConfig::GooglePhotos {
                url,
                regex,
                parse_title,
                title_regex,
            } => {
                let title_regex = if *parse_title {
                    Some(title_regex.as_str())
                } else {
                    None
                };
                Source::Page(PageSource::new(url.clone(), regex, title_regex)?)
            }
        };
        Ok(source)
    }

    /// How slide media types are found for this source.
    pub fn lookup(&self) -> Lookup {
        match self {
            Source::Urls(_) | Source::Folder(_) => Lookup::Extension,
            Source::Page(_) => Lookup::http_head(),
        }
    }
}

impl SourceFetcher for Source {
    async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
        match self {
            Source::Urls(s) => s.fetch().await,
            Source::Folder(s) => s.fetch().await,
            Source::Page(s) => s.fetch().await,
        }
    }

    fn identifier(&self) -> String {
        match self {
            Source::Urls(s) => s.identifier(),
            Source::Folder(s) => s.identifier(),
            Source::Page(s) => s.identifier(),
        }
    }
}

/// Literal URLs from the config, plus an optional file that is re-read on
/// every refresh.
#[derive(Debug, Clone)]
pub struct UrlListSource {
    urls: Vec<String>,
    file: Option<PathBuf>,
}

impl UrlListSource {
    pub fn new(urls: Vec<String>, file: Option<PathBuf>) -> Self {
        Self { urls, file }
    }
}

impl SourceFetcher for UrlListSource {
    async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.file {
            let content = tokio::fs::read_to_string(path).await?;
            urls.extend(parse_url_list(&content));
        }
        Ok(FetchOutcome { urls, title: None })
    }

    fn identifier(&self) -> String {
        match &self.file {
            Some(path) => path.display().to_string(),
            None => "urls".to_string(),
        }
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Media files in a local folder, served by our own HTTP server.
#[derive(Debug, Clone)]
pub struct FolderSource {
    folder: PathBuf,
    base: Url,
}

impl FolderSource {
    pub fn new(folder: PathBuf, public_base_url: &str) -> Result<Self, FetchError> {
        let base = Url::parse(public_base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| FetchError::InvalidBaseUrl(public_base_url.to_string()))?;
        Ok(Self { folder, base })
    }

    fn slide_url(&self, file_name: &str) -> Result<String, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .push(file_name);
        Ok(url.to_string())
    }
}

impl SourceFetcher for FolderSource {
    async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
        let names = list_media_files(&self.folder).await?;
        let urls = names
            .iter()
            .map(|name| self.slide_url(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FetchOutcome { urls, title: None })
    }

    fn identifier(&self) -> String {
        self.base.to_string()
    }
}

/// Names of the playable files in `folder`, sorted.
async fn list_media_files(folder: &Path) -> Result<Vec<String>, FetchError> {
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FetchError::MissingFolder(folder.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            debug!("Skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        if is_media_file(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Scrape slide URLs out of a web page.
#[derive(Debug, Clone)]
pub struct PageSource {
    url: String,
    pattern: Regex,
    title_pattern: Option<Regex>,
    client: Client,
}

impl PageSource {
    pub fn new(url: String, pattern: &str, title_pattern: Option<&str>) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(PAGE_TIMEOUT).build()?;
        Ok(Self {
            url,
            pattern: Regex::new(pattern)?,
            title_pattern: title_pattern.map(Regex::new).transpose()?,
            client,
        })
    }

    fn extract(&self, body: &str) -> FetchOutcome {
        FetchOutcome {
            urls: extract_matches(&self.pattern, body),
            title: self
                .title_pattern
                .as_ref()
                .and_then(|re| extract_title(re, body)),
        }
    }
}

impl SourceFetcher for PageSource {
    async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        Ok(self.extract(&body))
    }

    fn identifier(&self) -> String {
        self.url.clone()
    }
}

/// Every match of `pattern`, first-seen order, without duplicates. Uses
/// capture group 1 when the pattern has one.
pub fn extract_matches(pattern: &Regex, body: &str) -> Vec<String> {
    let grouped = pattern.captures_len() > 1;
    let mut urls: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(body) {
        let m = if grouped { caps.get(1) } else { caps.get(0) };
        let Some(m) = m else { continue };
        if !urls.iter().any(|u| u == m.as_str()) {
            urls.push(m.as_str().to_string());
        }
    }
    urls
}

fn extract_title(pattern: &Regex, body: &str) -> Option<String> {
    let caps = pattern.captures(body)?;
    let title = caps.get(1).or_else(|| caps.get(0))?.as_str().trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
