use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::embedded::{EmbeddedLoader, EmbeddedSession, LoaderPhase, Readiness};
use super::factory::EngineHosts;
use super::reconciler::{Reconciler, TickOutcome};
use super::resource::ResourceHandle;
use super::sampler::Sampler;
use super::selector;
use super::stream_fetcher::StreamFetcher;
use super::traits::{EmbedOptions, EmbeddedEvent, MediaSurface};
use crate::config::Config;
use crate::models::{
    BackendKind, BackendState, BackendStates, ContainerId, Credential, EngineEvent, EngineState,
    PlaybackRequest, PlaybackSource, PlaybackWindow, PositionReport, StreamDescriptor,
};
use crate::utils::{LoadError, PlaybackError, StreamError};

/// Commands that can be sent to the playback engine
#[derive(Debug)]
pub enum EngineCommand {
    /// Replace the current source; tears down the previous backend first
    Load {
        request: PlaybackRequest,
        respond_to: oneshot::Sender<()>,
    },
    /// Move the desired window, e.g. after a transcript line was clicked
    SetWindow {
        window: PlaybackWindow,
        autoplay: Option<bool>,
        respond_to: oneshot::Sender<()>,
    },
    /// Drop the current source
    Clear { respond_to: oneshot::Sender<()> },
    GetState {
        respond_to: oneshot::Sender<EngineState>,
    },
    GetBackendStates {
        respond_to: oneshot::Sender<BackendStates>,
    },
    /// Tear everything down and stop the event loop
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Continuations reported back by spawned work, tagged with the generation
/// of the backend activation that spawned them.
enum Internal {
    StreamFetched {
        generation: u64,
        result: Result<ResourceHandle, StreamError>,
    },
    EmbeddedApiReady {
        generation: u64,
        result: Result<(), LoadError>,
    },
    Embedded {
        generation: u64,
        event: EmbeddedEvent,
    },
    Tick {
        generation: u64,
    },
}

struct MediaBinding {
    generation: u64,
    token: CancellationToken,
    /// Set for stream data, whose media time is offset from clip time.
    stream: Option<StreamDescriptor>,
    loaded: bool,
    sampler: Option<Sampler>,
}

impl MediaBinding {
    fn new(generation: u64, token: CancellationToken, stream: Option<StreamDescriptor>) -> Self {
        Self {
            generation,
            token,
            stream,
            loaded: false,
            sampler: None,
        }
    }

    fn to_logical_time(&self, media_seconds: f64) -> f64 {
        match &self.stream {
            Some(descriptor) => descriptor.to_logical_time(media_seconds),
            None => media_seconds,
        }
    }

    fn to_media_time(&self, logical_seconds: f64) -> f64 {
        match &self.stream {
            Some(descriptor) => descriptor.to_media_time(logical_seconds),
            None => logical_seconds.max(0.0),
        }
    }
}

struct EmbeddedBinding {
    generation: u64,
    token: CancellationToken,
    session: EmbeddedSession,
}

/// The one backend currently driven by the engine.
enum ActiveBackend {
    Stream(MediaBinding),
    Embedded(EmbeddedBinding),
    Direct(MediaBinding),
}

impl ActiveBackend {
    fn kind(&self) -> BackendKind {
        match self {
            ActiveBackend::Stream(_) => BackendKind::AuthenticatedStream,
            ActiveBackend::Embedded(_) => BackendKind::Embedded,
            ActiveBackend::Direct(_) => BackendKind::DirectFile,
        }
    }

    fn generation(&self) -> u64 {
        match self {
            ActiveBackend::Stream(b) | ActiveBackend::Direct(b) => b.generation,
            ActiveBackend::Embedded(b) => b.generation,
        }
    }
}

/// Everything owned on behalf of one playback source.
struct Session {
    source: PlaybackSource,
    credential: Option<Credential>,
    states: BackendStates,
    active: Option<ActiveBackend>,
    token: CancellationToken,
}

fn media_binding(session: &mut Option<Session>, generation: u64) -> Option<&mut MediaBinding> {
    match session.as_mut()?.active.as_mut()? {
        ActiveBackend::Stream(b) | ActiveBackend::Direct(b) if b.generation == generation => Some(b),
        _ => None,
    }
}

fn embedded_binding(
    session: &mut Option<Session>,
    generation: u64,
) -> Option<&mut EmbeddedBinding> {
    match session.as_mut()?.active.as_mut()? {
        ActiveBackend::Embedded(b) if b.generation == generation => Some(b),
        _ => None,
    }
}

/// Owns every backend and processes commands and continuations one at a time
pub struct PlaybackEngine {
    config: Config,
    receiver: mpsc::UnboundedReceiver<EngineCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::UnboundedSender<EngineEvent>,

    surface: Box<dyn MediaSurface>,
    fetcher: StreamFetcher,
    loader: EmbeddedLoader,
    reconciler: Reconciler,
    container: ContainerId,
    default_credential: Option<Credential>,

    session: Option<Session>,
    generation: u64,
    state: EngineState,
}

impl PlaybackEngine {
    /// Create a new engine over the given hosts
    pub fn new(config: &Config, hosts: EngineHosts) -> (EngineHandle, PlaybackEngine) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let fetcher = StreamFetcher::new(hosts.stream_client, hosts.registry, &config.stream);
        let loader = EmbeddedLoader::new(
            hosts.script_host,
            hosts.embedded_api,
            config.embedded.clone(),
        );

        let engine = PlaybackEngine {
            config: config.clone(),
            receiver,
            internal_tx,
            internal_rx,
            events: events_tx,
            surface: hosts.surface,
            fetcher,
            loader,
            reconciler: Reconciler::new(&config.playback),
            container: ContainerId::generate(),
            default_credential: config.credential(),
            session: None,
            generation: 0,
            state: EngineState::NoSource,
        };
        let handle = EngineHandle {
            sender,
            event_receiver: Arc::new(Mutex::new(Some(events_rx))),
        };

        (handle, engine)
    }

    /// Run the engine event loop
    pub async fn run(mut self) {
        debug!("PlaybackEngine event loop started ({})", self.container);

        loop {
            tokio::select! {
                biased;
                command = self.receiver.recv() => match command {
                    Some(EngineCommand::Shutdown { respond_to }) => {
                        self.teardown_session().await;
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown_session().await;
                        break;
                    }
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message).await,
            }
        }

        debug!("PlaybackEngine event loop terminated");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Load {
                request,
                respond_to,
            } => {
                self.load(request).await;
                let _ = respond_to.send(());
            }
            EngineCommand::SetWindow {
                window,
                autoplay,
                respond_to,
            } => {
                self.set_window(window, autoplay).await;
                let _ = respond_to.send(());
            }
            EngineCommand::Clear { respond_to } => {
                self.teardown_session().await;
                self.set_state(EngineState::NoSource);
                let _ = respond_to.send(());
            }
            EngineCommand::GetState { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
            EngineCommand::GetBackendStates { respond_to } => {
                let states = self
                    .session
                    .as_ref()
                    .map(|s| s.states.clone())
                    .unwrap_or_default();
                let _ = respond_to.send(states);
            }
            EngineCommand::Shutdown { respond_to } => {
                // Handled by the event loop; only reachable if dispatched directly
                self.teardown_session().await;
                let _ = respond_to.send(());
            }
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::StreamFetched { generation, result } => {
                self.on_stream_fetched(generation, result).await
            }
            Internal::EmbeddedApiReady { generation, result } => {
                self.on_embedded_api_ready(generation, result).await
            }
            Internal::Embedded { generation, event } => {
                self.on_embedded_event(generation, event).await
            }
            Internal::Tick { generation } => self.on_tick(generation).await,
        }
    }

    async fn load(&mut self, request: PlaybackRequest) {
        info!("Loading new playback source");
        self.teardown_session().await;
        self.reconciler.set_target(request.window, request.autoplay);

        if request.source.is_empty() {
            debug!("{}", PlaybackError::NoSourceConfigured);
            self.set_state(EngineState::NoSource);
            return;
        }

        let credential = request
            .credential
            .clone()
            .or_else(|| self.default_credential.clone());
        let mut states = BackendStates::for_source(&request.source);
        if request.source.stream.is_some() && credential.is_none() {
            warn!("Stream source offered without a credential, skipping it");
            states.stream = BackendState::Unavailable;
        }

        self.session = Some(Session {
            source: request.source,
            credential,
            states,
            active: None,
            token: CancellationToken::new(),
        });
        self.reselect().await;
    }

    async fn set_window(&mut self, window: PlaybackWindow, autoplay: Option<bool>) {
        let autoplay = autoplay.unwrap_or(self.reconciler.autoplay());
        self.reconciler.set_target(window, autoplay);

        let Some(active) = self.session.as_ref().and_then(|s| s.active.as_ref()) else {
            return;
        };
        let (kind, generation) = (active.kind(), active.generation());
        match kind {
            BackendKind::Embedded => self.correct_embedded_drift(generation),
            _ => self.correct_media_drift(kind, generation).await,
        }
    }

    /// Re-runs backend selection until the active backend matches it.
    async fn reselect(&mut self) {
        loop {
            let Some(session) = self.session.as_ref() else {
                self.set_state(EngineState::NoSource);
                return;
            };

            let selection = selector::select(&session.states);
            let current = session.active.as_ref().map(ActiveBackend::kind);
            if selection.active == current {
                self.set_state(selection.state);
                return;
            }

            let failed = current.filter(|kind| !session.states.get(*kind).is_candidate());
            self.deactivate().await;

            let Some(next) = selection.active else {
                self.set_state(selection.state);
                return;
            };
            if let Some(from) = failed {
                info!("Falling back from {} to {}", from, next);
                self.emit(EngineEvent::FellBack { from, to: next });
            }
            self.activate(next).await;
        }
    }

    async fn activate(&mut self, kind: BackendKind) {
        self.generation += 1;
        let generation = self.generation;
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let token = session.token.child_token();
        debug!("Activating {} backend (generation {})", kind, generation);

        match kind {
            BackendKind::AuthenticatedStream => self.activate_stream(generation, token),
            BackendKind::Embedded => self.activate_embedded(generation, token),
            BackendKind::DirectFile => self.activate_direct(generation, token).await,
        }
    }

    fn activate_stream(&mut self, generation: u64, token: CancellationToken) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (Some(descriptor), Some(credential)) =
            (session.source.stream.clone(), session.credential.clone())
        else {
            session.states.stream = BackendState::Unavailable;
            return;
        };

        session.states.stream = BackendState::Loading;
        session.active = Some(ActiveBackend::Stream(MediaBinding::new(
            generation,
            token.clone(),
            Some(descriptor.clone()),
        )));

        let fetch = match self.fetcher.begin(&descriptor, &credential, token.clone()) {
            Ok(fetch) => fetch,
            Err(e) => {
                self.fail_backend(BackendKind::AuthenticatedStream, e.into());
                return;
            }
        };

        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = fetch.await;
            if token.is_cancelled() {
                trace!("Dropping stream result for cancelled generation {}", generation);
                return;
            }
            let _ = internal.send(Internal::StreamFetched { generation, result });
        });
    }

    fn activate_embedded(&mut self, generation: u64, token: CancellationToken) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.states.embedded = BackendState::Loading;
        session.active = Some(ActiveBackend::Embedded(EmbeddedBinding {
            generation,
            token: token.clone(),
            session: EmbeddedSession::new(),
        }));

        let task_token = token.clone();
        let wait = match self.loader.begin(token) {
            Ok(Readiness::Ready) => {
                if let Some(binding) = embedded_binding(&mut self.session, generation) {
                    binding.session.set_phase(LoaderPhase::ApiReady);
                }
                self.mount_embedded(generation);
                return;
            }
            Ok(Readiness::Pending(wait)) => wait,
            Err(e) => {
                if let Some(binding) = embedded_binding(&mut self.session, generation) {
                    binding.session.fail();
                }
                self.fail_backend(BackendKind::Embedded, e.into());
                return;
            }
        };
        if let Some(binding) = embedded_binding(&mut self.session, generation) {
            binding.session.set_phase(LoaderPhase::ScriptInjected);
            binding.session.set_phase(LoaderPhase::ApiPolling);
        }

        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = wait.await;
            if task_token.is_cancelled() {
                trace!("Readiness poll for generation {} cancelled", generation);
                return;
            }
            let _ = internal.send(Internal::EmbeddedApiReady { generation, result });
        });
    }

    async fn activate_direct(&mut self, generation: u64, token: CancellationToken) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(url) = session.source.direct_url.clone() else {
            session.states.direct = BackendState::Unavailable;
            return;
        };
        session.states.direct = BackendState::Loading;
        session.active = Some(ActiveBackend::Direct(MediaBinding::new(generation, token, None)));

        if let Err(e) = self.surface.load_media(&url).await {
            self.fail_backend(
                BackendKind::DirectFile,
                PlaybackError::MediaFailed(e.to_string()),
            );
            return;
        }
        self.on_media_loaded(BackendKind::DirectFile, generation).await;
    }

    /// Creates the vendor player and starts forwarding its callbacks.
    fn mount_embedded(&mut self, generation: u64) {
        let Some(video_id) = self
            .session
            .as_ref()
            .and_then(|s| s.source.embedded_id.clone())
        else {
            return;
        };
        let options = EmbedOptions::new(
            video_id,
            self.reconciler.window().start_seconds,
            self.reconciler.autoplay(),
            &self.loader.config().origin,
        );

        match self.loader.instantiate(&self.container, &options) {
            Ok((player, events)) => {
                let Some(binding) = embedded_binding(&mut self.session, generation) else {
                    let mut orphan = EmbeddedSession::new();
                    orphan.attach(player);
                    orphan.teardown();
                    return;
                };
                binding.session.attach(player);
                let token = binding.token.clone();
                self.forward_embedded_events(generation, token, events);
            }
            Err(e) => {
                if let Some(binding) = embedded_binding(&mut self.session, generation) {
                    binding.session.fail();
                }
                self.fail_backend(BackendKind::Embedded, e.into());
            }
        }
    }

    fn forward_embedded_events(
        &self,
        generation: u64,
        token: CancellationToken,
        mut events: mpsc::UnboundedReceiver<EmbeddedEvent>,
    ) {
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if internal.send(Internal::Embedded { generation, event }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn on_stream_fetched(
        &mut self,
        generation: u64,
        result: Result<ResourceHandle, StreamError>,
    ) {
        if media_binding(&mut self.session, generation).is_none() {
            debug!("Ignoring stream result for stale generation {}", generation);
            if let Ok(handle) = result {
                handle.revoke();
            }
            return;
        }

        match result {
            Ok(handle) => {
                info!("Stream ready ({} bytes)", handle.len());
                self.fetcher.adopt(handle.clone());
                match self.surface.load_media(handle.url()).await {
                    Ok(()) => {
                        self.on_media_loaded(BackendKind::AuthenticatedStream, generation)
                            .await
                    }
                    Err(e) => {
                        self.fetcher.release();
                        self.fail_backend(
                            BackendKind::AuthenticatedStream,
                            PlaybackError::MediaFailed(e.to_string()),
                        );
                    }
                }
            }
            Err(e) => self.fail_backend(BackendKind::AuthenticatedStream, e.into()),
        }

        self.reselect().await;
    }

    /// Positions freshly loaded media, starts it if requested and begins sampling.
    async fn on_media_loaded(&mut self, kind: BackendKind, generation: u64) {
        let Some(binding) = media_binding(&mut self.session, generation) else {
            return;
        };
        binding.loaded = true;

        let reported = self
            .surface
            .get_position()
            .await
            .map(|p| binding.to_logical_time(p));
        let plan = self.reconciler.plan_load(reported, kind);
        if let Some(target) = plan.seek_to {
            debug!("Positioning {} at {:.2}s", kind, target);
            if let Err(e) = self.surface.seek(binding.to_media_time(target)).await {
                warn!("Initial seek failed: {}", e);
            }
        }
        if plan.play {
            self.play_surface().await;
        }

        if let Some(session) = self.session.as_mut() {
            *session.states.get_mut(kind) = BackendState::Ready;
        }
        self.start_media_sampler(generation);
    }

    fn start_media_sampler(&mut self, generation: u64) {
        let interval = self.config.playback.position_interval();
        let internal = self.internal_tx.clone();
        let Some(binding) = media_binding(&mut self.session, generation) else {
            return;
        };
        let sampler = Sampler::start(interval, &binding.token, move || {
            internal.send(Internal::Tick { generation }).is_ok()
        });
        binding.sampler = Some(sampler);
    }

    async fn play_surface(&mut self) {
        if let Err(e) = self.surface.play().await {
            debug!("Play request rejected: {}", e);
        }
    }

    async fn correct_media_drift(&mut self, kind: BackendKind, generation: u64) {
        let Some(binding) = media_binding(&mut self.session, generation) else {
            return;
        };
        if !binding.loaded {
            // Applied once loading completes
            return;
        }

        let reported = self
            .surface
            .get_position()
            .await
            .map(|p| binding.to_logical_time(p));
        let tolerance = self.reconciler.tolerance(kind, false);
        let Some(target) = self.reconciler.correct_drift(reported, tolerance) else {
            return;
        };

        debug!("Seeking {} to {:.2}s", kind, target);
        if let Err(e) = self.surface.seek(binding.to_media_time(target)).await {
            warn!("Error seeking media: {}", e);
            return;
        }
        if self.reconciler.autoplay() {
            self.play_surface().await;
        }
    }

    fn correct_embedded_drift(&mut self, generation: u64) {
        let reconciler = &self.reconciler;
        let tolerance = reconciler.tolerance(BackendKind::Embedded, false);
        let Some(binding) = embedded_binding(&mut self.session, generation) else {
            return;
        };
        if !binding.session.is_ready() {
            return;
        }
        let Some(player) = binding.session.player_mut() else {
            return;
        };

        let reported = player.current_time().ok();
        let Some(target) = reconciler.correct_drift(reported, tolerance) else {
            return;
        };
        debug!("Seeking embedded player to {:.2}s", target);
        if let Err(e) = player.seek_to(target, true) {
            warn!("Error seeking embedded player: {}", e);
            return;
        }
        if reconciler.autoplay() {
            if let Err(e) = player.play() {
                debug!("Embedded play rejected: {}", e);
            }
        }
    }

    async fn on_embedded_api_ready(&mut self, generation: u64, result: Result<(), LoadError>) {
        let Some(binding) = embedded_binding(&mut self.session, generation) else {
            debug!("Ignoring readiness for stale generation {}", generation);
            return;
        };

        match result {
            Ok(()) => {
                binding.session.set_phase(LoaderPhase::ApiReady);
                self.mount_embedded(generation);
            }
            Err(e) => {
                binding.session.fail();
                self.fail_backend(BackendKind::Embedded, e.into());
            }
        }
        self.reselect().await;
    }

    async fn on_embedded_event(&mut self, generation: u64, event: EmbeddedEvent) {
        if embedded_binding(&mut self.session, generation).is_none() {
            trace!("Ignoring embedded event for stale generation {}", generation);
            return;
        }

        match event {
            EmbeddedEvent::Ready => {
                if let Some(binding) = embedded_binding(&mut self.session, generation) {
                    binding.session.mark_ready();
                }
                self.correct_embedded_drift(generation);
                self.start_embedded_playback(generation);
                if let Some(session) = self.session.as_mut() {
                    session.states.embedded = BackendState::Ready;
                }
                self.reselect().await;
            }
            EmbeddedEvent::StateChange(state) => {
                let interval = self.config.playback.position_interval();
                let internal = self.internal_tx.clone();
                let Some(binding) = embedded_binding(&mut self.session, generation) else {
                    return;
                };
                if binding.session.on_state_change(state) {
                    let sampler = Sampler::start(interval, &binding.token, move || {
                        internal.send(Internal::Tick { generation }).is_ok()
                    });
                    binding.session.start_sampler(sampler);
                } else {
                    binding.session.stop_sampler();
                }
            }
            EmbeddedEvent::Error(code) => {
                if let Some(binding) = embedded_binding(&mut self.session, generation) {
                    binding.session.fail();
                }
                self.fail_backend(BackendKind::Embedded, PlaybackError::EmbeddedPlayerError(code));
                self.reselect().await;
            }
        }
    }

    fn start_embedded_playback(&mut self, generation: u64) {
        if !self.reconciler.autoplay() {
            return;
        }
        let Some(player) = embedded_binding(&mut self.session, generation)
            .and_then(|binding| binding.session.player_mut())
        else {
            return;
        };
        if let Err(e) = player.play() {
            debug!("Embedded play rejected: {}", e);
        }
    }

    async fn on_tick(&mut self, generation: u64) {
        let Some(active) = self.session.as_ref().and_then(|s| s.active.as_ref()) else {
            return;
        };
        if active.generation() != generation {
            return;
        }

        match active.kind() {
            BackendKind::Embedded => self.sample_embedded(generation),
            _ => self.sample_media(generation).await,
        }
    }

    async fn sample_media(&mut self, generation: u64) {
        let Some(binding) = media_binding(&mut self.session, generation) else {
            return;
        };
        if self.surface.is_paused().await {
            return;
        }
        let Some(position) = self.surface.get_position().await else {
            return;
        };

        match self.reconciler.on_tick(binding.to_logical_time(position)) {
            TickOutcome::Report(current) => self.report_position(current),
            TickOutcome::Rewind(start) => {
                info!("Reached end of clip, rewinding to {:.2}s", start);
                if let Err(e) = self.surface.pause().await {
                    warn!("Error pausing media: {}", e);
                }
                if let Err(e) = self.surface.seek(binding.to_media_time(start)).await {
                    warn!("Error rewinding media: {}", e);
                }
                self.report_position(start);
            }
        }
    }

    fn sample_embedded(&mut self, generation: u64) {
        let reconciler = &self.reconciler;
        let Some(player) = embedded_binding(&mut self.session, generation)
            .and_then(|binding| binding.session.player_mut())
        else {
            return;
        };

        let current = match player.current_time() {
            Ok(current) => current,
            Err(e) => {
                trace!("Ignoring embedded sample: {}", e);
                return;
            }
        };

        let reported = match reconciler.on_tick(current) {
            TickOutcome::Report(current) => current,
            TickOutcome::Rewind(start) => {
                info!("Reached end of clip, rewinding to {:.2}s", start);
                if let Err(e) = player.pause() {
                    warn!("Error pausing embedded player: {}", e);
                }
                if let Err(e) = player.seek_to(start, true) {
                    warn!("Error rewinding embedded player: {}", e);
                }
                start
            }
        };
        self.report_position(reported);
    }

    fn report_position(&self, current_seconds: f64) {
        self.emit(EngineEvent::Position(PositionReport { current_seconds }));
    }

    fn fail_backend(&mut self, kind: BackendKind, error: PlaybackError) {
        warn!("{} backend failed: {}", kind, error);
        if let Some(session) = self.session.as_mut() {
            *session.states.get_mut(kind) = BackendState::Error(error.to_string());
        }
    }

    async fn deactivate(&mut self) {
        let Some(active) = self.session.as_mut().and_then(|s| s.active.take()) else {
            return;
        };
        self.release_backend(active).await;
    }

    /// Stops timers and releases everything the backend holds.
    async fn release_backend(&mut self, active: ActiveBackend) {
        let kind = active.kind();
        match active {
            ActiveBackend::Stream(binding) | ActiveBackend::Direct(binding) => {
                binding.token.cancel();
                if let Some(sampler) = binding.sampler {
                    sampler.stop();
                }
                if binding.loaded {
                    if let Err(e) = self.surface.unload().await {
                        debug!("Error unloading media: {}", e);
                    }
                }
                self.fetcher.release();
            }
            ActiveBackend::Embedded(mut binding) => {
                binding.token.cancel();
                binding.session.teardown();
            }
        }
        debug!("Released {} backend", kind);
    }

    async fn teardown_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        debug!("Tearing down playback source");
        session.token.cancel();
        if let Some(active) = session.active.take() {
            self.release_backend(active).await;
        }
        self.fetcher.release();
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        info!("Engine state {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        self.emit(EngineEvent::StateChanged { state });
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Handle to send commands to the playback engine
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::UnboundedSender<EngineCommand>,
    event_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("sender", &"<UnboundedSender>")
            .field("event_receiver", &"<Arc<Mutex<...>>>")
            .finish()
    }
}

impl EngineHandle {
    /// Take the event receiver (can only be done once)
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.event_receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, PlaybackError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(command(respond_to))
            .map_err(|_| PlaybackError::EngineClosed)?;
        response.await.map_err(|_| PlaybackError::EngineClosed)
    }

    /// Present a new clip, superseding the current one
    pub async fn load(&self, request: PlaybackRequest) -> Result<(), PlaybackError> {
        self.request(|respond_to| EngineCommand::Load {
            request,
            respond_to,
        })
        .await
    }

    /// Move the desired window; `autoplay` keeps its previous value when `None`
    pub async fn set_window(
        &self,
        window: PlaybackWindow,
        autoplay: Option<bool>,
    ) -> Result<(), PlaybackError> {
        self.request(|respond_to| EngineCommand::SetWindow {
            window,
            autoplay,
            respond_to,
        })
        .await
    }

    /// Drop the current clip
    pub async fn clear(&self) -> Result<(), PlaybackError> {
        self.request(|respond_to| EngineCommand::Clear { respond_to })
            .await
    }

    pub async fn state(&self) -> Result<EngineState, PlaybackError> {
        self.request(|respond_to| EngineCommand::GetState { respond_to })
            .await
    }

    pub async fn backend_states(&self) -> Result<BackendStates, PlaybackError> {
        self.request(|respond_to| EngineCommand::GetBackendStates { respond_to })
            .await
    }

    /// Tear down and stop the engine
    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        self.request(|respond_to| EngineCommand::Shutdown { respond_to })
            .await
    }
}
