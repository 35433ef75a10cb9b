//! Media-type lookup for cast-capable viewers.
//!
//! Results are cached for the life of the process. Concurrent requests for
//! the same URL share one lookup through a per-URL `OnceCell`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// How an unknown URL gets its media type.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Guess from the file extension.
    Extension,
    /// Ask the server with a `HEAD` request.
    HttpHead(Client),
    /// Extension guess that takes a while, like a slow server.
    #[cfg(test)]
    Delayed(Duration),
}

impl Lookup {
    pub fn http_head() -> Self {
        let client = Client::builder()
            .timeout(HEAD_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build();
        Self::from_client(client)
    }

    /// `HEAD` lookups when the client built, extension guesses otherwise.
    /// A client without the timeout could hold a slide back indefinitely.
    fn from_client(client: reqwest::Result<Client>) -> Self {
        match client {
            Ok(client) => Lookup::HttpHead(client),
            Err(e) => {
                warn!(
                    "Cannot build HTTP client for media types ({}), guessing from extensions",
                    e
                );
                Lookup::Extension
            }
        }
    }
}

type Slot = Arc<OnceCell<Option<String>>>;

#[derive(Debug)]
pub struct ContentTypeResolver {
    lookup: Lookup,
    cache: Mutex<HashMap<String, Slot>>,
    lookups: AtomicUsize,
}

impl ContentTypeResolver {
    pub fn new(lookup: Lookup) -> Self {
        Self {
            lookup,
            cache: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Record a media type known up front (e.g. from the config file).
    pub fn seed(&self, url: impl Into<String>, content_type: Option<String>) {
        let slot = Arc::new(OnceCell::new_with(Some(content_type)));
        self.slots().insert(url.into(), slot);
    }

    /// The cached result for `url`, without starting a lookup.
    /// `None` means "not resolved yet"; `Some(None)` means "resolved, unknown".
    pub fn cached(&self, url: &str) -> Option<Option<String>> {
        self.slots().get(url).and_then(|slot| slot.get().cloned())
    }

    pub async fn resolve(&self, url: &str) -> Option<String> {
        let slot = Arc::clone(self.slots().entry(url.to_string()).or_default());
        slot.get_or_init(|| self.lookup(url)).await.clone()
    }

    /// Number of lookups actually performed (cache misses).
    #[cfg(test)]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lookup(&self, url: &str) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let content_type = match &self.lookup {
            Lookup::Extension => content_type_from_extension(url).map(str::to_owned),
            Lookup::HttpHead(client) => head_content_type(client, url).await,
            #[cfg(test)]
            Lookup::Delayed(delay) => {
                tokio::time::sleep(*delay).await;
                content_type_from_extension(url).map(str::to_owned)
            }
        };
        debug!("content type {} -> {:?}", url, content_type);
        content_type
    }
}

async fn head_content_type(client: &Client, url: &str) -> Option<String> {
    let response = match client.head(url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("HEAD {} failed: {}", url, e);
            return None;
        }
    };
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Media type for the extensions the viewer page knows how to play.
pub fn content_type_from_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",
        _ => return None,
    };
    Some(content_type)
}

/// Extensions the folder source picks up.
pub fn is_media_file(name: &str) -> bool {
    content_type_from_extension(name).is_some()
}
