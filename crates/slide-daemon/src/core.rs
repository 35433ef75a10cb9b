//! `DaemonCore` owns the show: playlist, pause/speed state and the viewer
//! registry. Everything that mutates them arrives as a `DaemonEvent` on one
//! channel, so the loop below is the only writer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use slide_proto::config::Config;
use slide_proto::playlist::Playlist;
use slide_proto::protocol::{Command, Notice, ServerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, SessionId, SessionSender};
use crate::content_type::ContentTypeResolver;
use crate::error::FetchError;
use crate::source::{FetchOutcome, SourceFetcher};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const MIN_SLIDE_DURATION: Duration = Duration::from_millis(50);
const MAX_SLIDE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub enum DaemonEvent {
    ViewerCommand(Command),
    /// A viewer connected. `ack` gets its id once the snapshot is queued.
    SessionOpened {
        sender: SessionSender,
        ack: oneshot::Sender<SessionId>,
    },
    SessionClosed(SessionId),
    FetchCompleted(Result<FetchOutcome, FetchError>),
    ContentTypeResolved {
        generation: u64,
        url: String,
        content_type: Option<String>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct CoreSettings {
    /// Seconds per slide at speed 1.
    pub base_duration: Duration,
    pub refresh_interval: Duration,
    /// Tick while paused or empty.
    pub poll_interval: Duration,
    pub support_casting: bool,
    pub title: String,
}

impl CoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_duration: Duration::try_from_secs_f64(config.show.image_duration)
                .unwrap_or(MAX_SLIDE_DURATION),
            refresh_interval: Duration::from_secs(config.show.refresh_interval),
            poll_interval: POLL_INTERVAL,
            support_casting: config.show.support_casting,
            title: config.initial_title(),
        }
    }
}

/// What `/api/state` reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShowSummary {
    pub title: String,
    pub source: String,
    pub current: Option<String>,
    pub position: Option<usize>,
    pub count: usize,
    pub paused: bool,
    pub speed: f64,
    pub viewers: usize,
    /// Last successful fetch.
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ShowState {
    playlist: Playlist,
    paused: bool,
    speed: f64,
    base_duration: Duration,
    title: String,
    source: String,
    last_refresh: Option<DateTime<Utc>>,
}

impl ShowState {
    fn effective_duration(&self) -> Duration {
        let secs = self.base_duration.as_secs_f64() / self.speed;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_SLIDE_DURATION)
            .clamp(MIN_SLIDE_DURATION, MAX_SLIDE_DURATION)
    }
}

pub struct DaemonCore<F: SourceFetcher> {
    settings: CoreSettings,
    state: ShowState,
    fetcher: Arc<F>,
    resolver: Arc<ContentTypeResolver>,
    broadcaster: Broadcaster,
    event_tx: mpsc::Sender<DaemonEvent>,
    summary_tx: watch::Sender<ShowSummary>,
    next_advance: Instant,
    last_advance: Instant,
    next_refresh: Instant,
    fetch_in_flight: bool,
    /// Bumped on every slide change; stale content-type results are dropped.
    generation: u64,
    /// The current slide waits on its media type. Playback holds until it
    /// has been broadcast.
    awaiting_type: bool,
}

impl<F: SourceFetcher> DaemonCore<F> {
    pub fn new(
        settings: CoreSettings,
        fetcher: Arc<F>,
        resolver: Arc<ContentTypeResolver>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let now = Instant::now();
        let state = ShowState {
            playlist: Playlist::new(),
            paused: false,
            speed: 1.0,
            base_duration: settings.base_duration,
            title: settings.title.clone(),
            source: fetcher.identifier(),
            last_refresh: None,
        };
        let (summary_tx, _) = watch::channel(ShowSummary::default());

        let core = Self {
            next_advance: now + settings.poll_interval,
            last_advance: now,
            next_refresh: now,
            settings,
            state,
            fetcher,
            resolver,
            broadcaster: Broadcaster::new(),
            event_tx,
            summary_tx,
            fetch_in_flight: false,
            generation: 0,
            awaiting_type: false,
        };
        core.publish_summary();
        core
    }

    pub fn summary(&self) -> watch::Receiver<ShowSummary> {
        self.summary_tx.subscribe()
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!(
            "Showing {:?} from {} ({:?} per slide, refresh every {:?})",
            self.state.title,
            self.state.source,
            self.settings.base_duration,
            self.settings.refresh_interval
        );

        loop {
            let refresh_idle = !self.fetch_in_flight;
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(DaemonEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
                _ = tokio::time::sleep_until(self.next_advance) => self.playback_tick(),
                _ = tokio::time::sleep_until(self.next_refresh), if refresh_idle => self.start_fetch(),
            }
        }

        if !self.broadcaster.is_empty() {
            info!("Shutting down, closing {} viewer sessions", self.broadcaster.len());
        }
        self.broadcaster.close_all();
        self.publish_summary();
        Ok(())
    }

    fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::ViewerCommand(cmd) => self.handle_command(cmd),
            DaemonEvent::SessionOpened { sender, ack } => self.open_session(sender, ack),
            DaemonEvent::SessionClosed(id) => {
                if self.broadcaster.unregister(id) {
                    self.publish_summary();
                }
            }
            DaemonEvent::FetchCompleted(result) => self.finish_fetch(result),
            DaemonEvent::ContentTypeResolved {
                generation,
                url,
                content_type,
            } => {
                if generation != self.generation {
                    debug!("Dropping stale content type for {}", url);
                    return;
                }
                self.awaiting_type = false;
                if self.state.playlist.current() == Some(url.as_str()) {
                    self.broadcaster
                        .broadcast(&ServerMessage::slide(url, content_type));
                }
                // The slide gets its full duration from when viewers saw it.
                self.restart_timer();
            }
            DaemonEvent::Shutdown => {}
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        info!("Viewer command: {:?}", cmd);
        match cmd {
            Command::Next => {
                let moved = self.state.playlist.advance().is_ok();
                self.after_navigation(moved);
            }
            Command::Previous => {
                let moved = self.state.playlist.retreat().is_ok();
                self.after_navigation(moved);
            }
            Command::Pause => {
                if self.state.paused {
                    debug!("Already paused");
                    return;
                }
                self.state.paused = true;
                self.broadcaster.broadcast(&Notice::Pause.into());
                self.publish_summary();
            }
            Command::Play => {
                if !self.state.paused {
                    debug!("Already playing");
                    return;
                }
                self.state.paused = false;
                let now = Instant::now();
                self.last_advance = now;
                self.next_advance = now + self.state.effective_duration();
                self.broadcaster.broadcast(&Notice::Play.into());
                self.publish_summary();
            }
            Command::Speed { value } => {
                if value <= 0.0 || value == self.state.speed {
                    debug!("Ignoring speed {}", value);
                    return;
                }
                self.state.speed = value;
                if !self.state.paused && !self.state.playlist.is_empty() {
                    self.next_advance = self.last_advance + self.state.effective_duration();
                }
                self.broadcaster
                    .broadcast(&Notice::Speed { speed: value }.into());
                self.publish_summary();
            }
        }
    }

    fn after_navigation(&mut self, moved: bool) {
        if !moved {
            debug!("Playlist is empty, nothing to navigate to");
            return;
        }
        self.show_current();
        self.restart_timer();
    }

    fn restart_timer(&mut self) {
        let now = Instant::now();
        self.last_advance = now;
        self.next_advance = now + self.state.effective_duration();
    }

    fn playback_tick(&mut self) {
        if self.state.paused || self.state.playlist.is_empty() || self.awaiting_type {
            self.next_advance = Instant::now() + self.settings.poll_interval;
            return;
        }
        if self.state.playlist.advance().is_ok() {
            self.show_current();
        }
        self.restart_timer();
    }

    /// Broadcast the slide at the current position.
    fn show_current(&mut self) {
        self.generation += 1;
        self.awaiting_type = false;
        let Some(url) = self.state.playlist.current().map(str::to_owned) else {
            return;
        };

        if !self.settings.support_casting {
            self.broadcaster.broadcast(&ServerMessage::slide(url, None));
        } else {
            match self.resolver.cached(&url) {
                Some(content_type) => {
                    self.broadcaster
                        .broadcast(&ServerMessage::slide(url, content_type));
                }
                None => {
                    self.awaiting_type = true;
                    self.spawn_resolve(url, Some(self.generation));
                }
            }
            if let Some(next) = self.state.playlist.upcoming() {
                if self.resolver.cached(next).is_none() {
                    self.spawn_resolve(next.to_string(), None);
                }
            }
        }
        self.publish_summary();
    }

    /// Look up a media type off the loop. With a generation, the result is
    /// reported back so the slide can be broadcast; without one it only
    /// warms the cache.
    fn spawn_resolve(&self, url: String, generation: Option<u64>) {
        let resolver = Arc::clone(&self.resolver);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let content_type = resolver.resolve(&url).await;
            if let Some(generation) = generation {
                let _ = event_tx
                    .send(DaemonEvent::ContentTypeResolved {
                        generation,
                        url,
                        content_type,
                    })
                    .await;
            }
        });
    }

    fn start_fetch(&mut self) {
        self.fetch_in_flight = true;
        let fetcher = Arc::clone(&self.fetcher);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch().await;
            let _ = event_tx.send(DaemonEvent::FetchCompleted(result)).await;
        });
    }

    fn finish_fetch(&mut self, result: Result<FetchOutcome, FetchError>) {
        self.fetch_in_flight = false;
        self.next_refresh = Instant::now() + self.settings.refresh_interval;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to fetch urls from {}: {}", self.state.source, e);
                return;
            }
        };
        self.state.last_refresh = Some(Utc::now());

        if let Some(title) = outcome.title {
            if title != self.state.title {
                info!("Title changed to {:?}", title);
                self.state.title = title.clone();
                self.broadcaster.broadcast(&Notice::Title { title }.into());
            }
        }

        let was_empty = self.state.playlist.is_empty();
        let merged = self.state.playlist.merge(outcome.urls);
        if !merged.added.is_empty() {
            info!("found {} new urls", merged.added.len());
        }
        if !merged.removed.is_empty() {
            info!("removed {} urls", merged.removed.len());
        }

        if was_empty && !self.state.playlist.is_empty() {
            self.show_current();
            self.restart_timer();
        }
        self.publish_summary();
    }

    fn open_session(&mut self, sender: SessionSender, ack: oneshot::Sender<SessionId>) {
        let snapshot = self.snapshot();
        match self.broadcaster.register(sender, snapshot) {
            Ok(id) => {
                if ack.send(id).is_err() {
                    self.broadcaster.unregister(id);
                }
                self.publish_summary();
            }
            Err(e) => debug!("{} before registration finished", e),
        }
    }

    /// Messages a new viewer needs: slide, speed, play/pause, source, title.
    fn snapshot(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::with_capacity(5);
        if let Some(url) = self.state.playlist.current() {
            let content_type = if self.settings.support_casting {
                self.resolver.cached(url).flatten()
            } else {
                None
            };
            messages.push(ServerMessage::slide(url, content_type));
        }
        messages.push(
            Notice::Speed {
                speed: self.state.speed,
            }
            .into(),
        );
        messages.push(if self.state.paused {
            Notice::Pause.into()
        } else {
            Notice::Play.into()
        });
        messages.push(
            Notice::Source {
                source: self.state.source.clone(),
            }
            .into(),
        );
        messages.push(
            Notice::Title {
                title: self.state.title.clone(),
            }
            .into(),
        );
        messages
    }

    fn publish_summary(&self) {
        self.summary_tx.send_replace(ShowSummary {
            title: self.state.title.clone(),
            source: self.state.source.clone(),
            current: self.state.playlist.current().map(str::to_owned),
            position: self.state.playlist.position(),
            count: self.state.playlist.len(),
            paused: self.state.paused,
            speed: self.state.speed,
            viewers: self.broadcaster.len(),
            last_refresh: self.state.last_refresh,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{session_channel, SessionReceiver};
    use crate::content_type::{content_type_from_extension, Lookup};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Replays a list of fetch results, repeating the last one forever.
    /// `None` entries fail.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Option<Vec<&'static str>>>>,
        last: Mutex<Option<Vec<&'static str>>>,
        title: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Option<Vec<&'static str>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Some(Vec::new())),
                title: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_title(mut self, title: &'static str) -> Self {
            self.title = Some(title);
            self
        }
    }

    impl SourceFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut last = self.last.lock().unwrap();
                if let Some(next) = self.script.lock().unwrap().pop_front() {
                    *last = next;
                }
                last.clone()
            };
            match step {
                Some(urls) => Ok(FetchOutcome {
                    urls: urls.into_iter().map(str::to_owned).collect(),
                    title: self.title.map(str::to_owned),
                }),
                None => Err(FetchError::MissingFolder("scripted".into())),
            }
        }

        fn identifier(&self) -> String {
            "scripted".to_string()
        }
    }

    struct Harness {
        event_tx: mpsc::Sender<DaemonEvent>,
        summary: watch::Receiver<ShowSummary>,
        fetcher: Arc<ScriptedFetcher>,
        handle: JoinHandle<anyhow::Result<()>>,
    }

    fn settings(casting: bool) -> CoreSettings {
        CoreSettings {
            base_duration: Duration::from_secs(4),
            refresh_interval: Duration::from_secs(5),
            poll_interval: POLL_INTERVAL,
            support_casting: casting,
            title: "Show".to_string(),
        }
    }

    fn start(settings: CoreSettings, fetcher: ScriptedFetcher) -> Harness {
        start_with_lookup(settings, fetcher, Lookup::Extension)
    }

    fn start_with_lookup(
        settings: CoreSettings,
        fetcher: ScriptedFetcher,
        lookup: Lookup,
    ) -> Harness {
        let fetcher = Arc::new(fetcher);
        let resolver = Arc::new(ContentTypeResolver::new(lookup));
        let (event_tx, event_rx) = mpsc::channel(64);
        let core = DaemonCore::new(settings, Arc::clone(&fetcher), resolver, event_tx.clone());
        let summary = core.summary();
        let handle = tokio::spawn(core.run(event_rx));
        Harness {
            event_tx,
            summary,
            fetcher,
            handle,
        }
    }

    impl Harness {
        async fn connect(&self) -> SessionReceiver {
            let (sender, rx) = session_channel();
            let (ack, ack_rx) = oneshot::channel();
            self.event_tx
                .send(DaemonEvent::SessionOpened { sender, ack })
                .await
                .unwrap();
            ack_rx.await.unwrap();
            rx
        }

        async fn command(&self, cmd: Command) {
            self.event_tx
                .send(DaemonEvent::ViewerCommand(cmd))
                .await
                .unwrap();
            settle().await;
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut SessionReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn next_slide(rx: &mut SessionReceiver) -> String {
        loop {
            match rx.recv().await.unwrap() {
                ServerMessage::Slide { url, .. } => return url,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_reaches_all_sessions_and_shortens_ticks() {
        let h = start(settings(false), ScriptedFetcher::new(vec![Some(vec!["a", "b", "c"])]));
        settle().await;

        let mut rx1 = h.connect().await;
        let mut rx2 = h.connect().await;
        drain(&mut rx1);
        drain(&mut rx2);

        h.command(Command::Speed { value: 2.0 }).await;
        let expected = vec![ServerMessage::from(Notice::Speed { speed: 2.0 })];
        assert_eq!(drain(&mut rx1), expected);
        assert_eq!(drain(&mut rx2), expected);

        next_slide(&mut rx1).await;
        let t1 = Instant::now();
        next_slide(&mut rx1).await;
        let t2 = Instant::now();
        assert!((t2 - t1).as_millis().abs_diff(2000) <= 5);
        assert_eq!(h.summary.borrow().speed, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_playing() {
        let mut s = settings(false);
        s.base_duration = Duration::from_secs(1);
        s.refresh_interval = Duration::from_secs(1);
        let h = start(s, ScriptedFetcher::new(vec![Some(vec!["a", "b", "c"]), None]));
        settle().await;
        let mut rx = h.connect().await;
        drain(&mut rx);

        for _ in 0..5 {
            next_slide(&mut rx).await;
        }

        assert!(h.fetcher.calls.load(Ordering::SeqCst) >= 3);
        let summary = h.summary.borrow().clone();
        assert_eq!(summary.count, 3);
        assert!(summary.last_refresh.is_some());
        assert!(summary.current.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_commands_broadcast_once() {
        let h = start(settings(false), ScriptedFetcher::new(vec![Some(vec!["a", "b"])]));
        settle().await;
        let mut rx = h.connect().await;
        drain(&mut rx);

        h.command(Command::Pause).await;
        h.command(Command::Pause).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::from(Notice::Pause)]);

        h.command(Command::Speed { value: 1.0 }).await;
        h.command(Command::Speed { value: 0.0 }).await;
        h.command(Command::Speed { value: -3.0 }).await;
        assert!(drain(&mut rx).is_empty());

        // No slide changes while paused.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(drain(&mut rx).is_empty());

        h.command(Command::Play).await;
        h.command(Command::Play).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::from(Notice::Play)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_broadcasts_slides() {
        let h = start(settings(false), ScriptedFetcher::new(vec![Some(vec!["a", "b", "c"])]));
        settle().await;
        let mut rx = h.connect().await;
        let first = match &drain(&mut rx)[0] {
            ServerMessage::Slide { url, .. } => url.clone(),
            other => panic!("expected slide, got {:?}", other),
        };

        h.command(Command::Next).await;
        let second = next_slide(&mut rx).await;
        assert_ne!(second, first);

        h.command(Command::Previous).await;
        assert_eq!(next_slide(&mut rx).await, first);
        assert_eq!(h.summary.borrow().position, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_playlist_ignores_navigation() {
        let h = start(settings(false), ScriptedFetcher::new(vec![Some(Vec::new())]));
        settle().await;
        let mut rx = h.connect().await;

        // No slide in the snapshot.
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::from(Notice::Speed { speed: 1.0 }),
                Notice::Play.into(),
                Notice::Source {
                    source: "scripted".into()
                }
                .into(),
                Notice::Title {
                    title: "Show".into()
                }
                .into(),
            ]
        );

        h.command(Command::Next).await;
        h.command(Command::Previous).await;
        assert!(drain(&mut rx).is_empty());

        // Commands still land in state while empty.
        h.command(Command::Pause).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::from(Notice::Pause)]);
        assert!(h.summary.borrow().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_snapshot_order() {
        let h = start(
            settings(true),
            ScriptedFetcher::new(vec![Some(vec!["http://h/a.png"])]).with_title("Album"),
        );
        settle().await;
        h.command(Command::Pause).await;
        h.command(Command::Speed { value: 0.5 }).await;

        let mut rx = h.connect().await;
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::slide("http://h/a.png", Some("image/png".into())),
                Notice::Speed { speed: 0.5 }.into(),
                Notice::Pause.into(),
                Notice::Source {
                    source: "scripted".into()
                }
                .into(),
                Notice::Title {
                    title: "Album".into()
                }
                .into(),
            ]
        );
        assert_eq!(h.summary.borrow().viewers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_casting_sends_content_types() {
        let h = start(
            settings(true),
            ScriptedFetcher::new(vec![Some(vec!["http://h/a.png", "http://h/b.mp4"])]),
        );
        settle().await;
        let mut rx = h.connect().await;
        drain(&mut rx);

        for _ in 0..3 {
            h.command(Command::Next).await;
            let msgs = drain(&mut rx);
            assert_eq!(msgs.len(), 1);
            match &msgs[0] {
                ServerMessage::Slide { url, content_type } => {
                    assert_eq!(
                        content_type.as_deref(),
                        content_type_from_extension(url)
                    );
                }
                other => panic!("expected slide, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_media_type_lookup_still_shows_every_slide() {
        // Lookups take longer than a slide lasts.
        let h = start_with_lookup(
            settings(true),
            ScriptedFetcher::new(vec![Some(vec![
                "http://h/1.png",
                "http://h/2.png",
                "http://h/3.mp4",
                "http://h/4.png",
            ])]),
            Lookup::Delayed(Duration::from_secs(10)),
        );
        settle().await;
        let mut rx = h.connect().await;
        drain(&mut rx);

        let mut positions = Vec::new();
        let mut shown_at = Vec::new();
        while positions.len() < 3 {
            let ServerMessage::Slide { url, content_type } = rx.recv().await.unwrap() else {
                continue;
            };
            assert_eq!(content_type.as_deref(), content_type_from_extension(&url));
            let summary = h.summary.borrow().clone();
            assert_eq!(summary.current.as_deref(), Some(url.as_str()));
            positions.push(summary.position.unwrap());
            shown_at.push(Instant::now());
        }

        assert_eq!(positions, vec![0, 1, 2]);
        for pair in shown_at.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(4));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_drops_stale_media_type() {
        let mut s = settings(true);
        s.base_duration = Duration::from_secs(60);
        let h = start_with_lookup(
            s,
            ScriptedFetcher::new(vec![Some(vec![
                "http://h/a.png",
                "http://h/b.png",
                "http://h/c.png",
            ])]),
            Lookup::Delayed(Duration::from_secs(10)),
        );
        settle().await;
        let mut rx = h.connect().await;
        drain(&mut rx);
        next_slide(&mut rx).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The upcoming slide was looked up alongside the first one.
        h.command(Command::Next).await;
        let second = match drain(&mut rx).as_slice() {
            [ServerMessage::Slide { url, content_type }] => {
                assert!(content_type.is_some());
                url.clone()
            }
            other => panic!("expected one slide, got {:?}", other),
        };

        // The third slide is still being looked up when the viewer steps back.
        h.command(Command::Next).await;
        assert!(drain(&mut rx).is_empty());
        h.command(Command::Previous).await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::slide(second.clone(), Some("image/png".into()))]
        );

        // Its late result must not replace the slide on screen.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(h.summary.borrow().current, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_urls_are_picked_up_on_refresh() {
        let h = start(
            settings(false),
            ScriptedFetcher::new(vec![Some(vec!["a"]), Some(vec!["a", "b"])]),
        );
        settle().await;
        assert_eq!(h.summary.borrow().count, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.summary.borrow().count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_sessions() {
        let h = start(settings(false), ScriptedFetcher::new(vec![Some(vec!["a"])]));
        settle().await;
        let mut rx = h.connect().await;

        h.event_tx.send(DaemonEvent::Shutdown).await.unwrap();
        h.handle.await.unwrap().unwrap();

        drain(&mut rx);
        assert!(rx.recv().await.is_none());
    }
}
