use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sampler::Sampler;
use super::traits::{
    EmbedOptions, EmbeddedEvent, EmbeddedPlayer, EmbeddedPlayerApi, EmbeddedPlayerState,
    ScriptHost,
};
use crate::config::EmbeddedConfig;
use crate::models::ContainerId;
use crate::utils::LoadError;

/// Serializes check-then-inject across every engine in the process.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

/// Injects `src` into `host` unless a tag for it already exists.
/// Returns whether this call performed the injection.
pub fn ensure_script(host: &dyn ScriptHost, src: &str) -> Result<bool, LoadError> {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if host.has_script(src) {
        debug!("Player script {} already present", src);
        return Ok(false);
    }

    host.inject_script(src)
        .map_err(|e| LoadError::ScriptInjection(e.to_string()))?;
    info!("Injected player script {}", src);
    Ok(true)
}

/// Polls `api` every `interval` until it is ready. Gives up when `token`
/// is cancelled or `timeout` elapses.
pub async fn wait_for_api(
    api: &dyn EmbeddedPlayerApi,
    interval: Duration,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<(), LoadError> {
    if api.is_ready() {
        return Ok(());
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(LoadError::Cancelled),
            _ = ticker.tick() => {
                if api.is_ready() {
                    return Ok(());
                }
            }
            _ = &mut deadline => return Err(LoadError::Timeout(timeout)),
        }
    }
}

/// Lifecycle of one embedded backend activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderPhase {
    NotLoaded,
    ScriptInjected,
    ApiPolling,
    ApiReady,
    Instantiated,
    Playing,
    Paused,
    Ended,
    ErrorState,
}

/// Outcome of [`EmbeddedLoader::begin`].
pub enum Readiness {
    Ready,
    Pending(BoxFuture<'static, Result<(), LoadError>>),
}

/// Brings up the vendor API and mounts players.
#[derive(Clone)]
pub struct EmbeddedLoader {
    host: Arc<dyn ScriptHost>,
    api: Arc<dyn EmbeddedPlayerApi>,
    config: EmbeddedConfig,
}

impl EmbeddedLoader {
    pub fn new(
        host: Arc<dyn ScriptHost>,
        api: Arc<dyn EmbeddedPlayerApi>,
        config: EmbeddedConfig,
    ) -> Self {
        Self { host, api, config }
    }

    pub fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    pub fn inject_script(&self) -> Result<bool, LoadError> {
        ensure_script(self.host.as_ref(), &self.config.script_url)
    }

    /// Starts bringing the vendor API up. When it is not ready yet the
    /// script is injected and the returned poll owns everything it needs.
    pub fn begin(&self, token: CancellationToken) -> Result<Readiness, LoadError> {
        if self.api.is_ready() {
            return Ok(Readiness::Ready);
        }
        self.inject_script()?;

        let api = self.api.clone();
        let interval = self.config.poll_interval();
        let timeout = self.config.ready_timeout();
        Ok(Readiness::Pending(
            async move { wait_for_api(api.as_ref(), interval, timeout, &token).await }.boxed(),
        ))
    }

    pub fn instantiate(
        &self,
        container: &ContainerId,
        options: &EmbedOptions,
    ) -> Result<(Box<dyn EmbeddedPlayer>, mpsc::UnboundedReceiver<EmbeddedEvent>), LoadError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let player = self
            .api
            .create_player(container, options, events_tx)
            .map_err(|e| LoadError::Instantiate(e.to_string()))?;
        info!(
            "Created embedded player for {} in {}",
            options.video_id, container
        );
        Ok((player, events_rx))
    }
}

/// A mounted (or mounting) vendor player and its sampling timer.
pub struct EmbeddedSession {
    phase: LoaderPhase,
    player: Option<Box<dyn EmbeddedPlayer>>,
    ready: bool,
    sampler: Option<Sampler>,
}

impl EmbeddedSession {
    pub fn new() -> Self {
        Self {
            phase: LoaderPhase::NotLoaded,
            player: None,
            ready: false,
            sampler: None,
        }
    }

    pub fn phase(&self) -> LoaderPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: LoaderPhase) {
        debug!("Embedded player phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn attach(&mut self, player: Box<dyn EmbeddedPlayer>) {
        self.player = Some(player);
        self.set_phase(LoaderPhase::Instantiated);
    }

    pub fn is_ready(&self) -> bool {
        self.ready && self.player.is_some()
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn player_mut(&mut self) -> Option<&mut (dyn EmbeddedPlayer + 'static)> {
        self.player.as_deref_mut()
    }

    pub fn player(&self) -> Option<&(dyn EmbeddedPlayer + 'static)> {
        self.player.as_deref()
    }

    /// Applies a vendor state change. Returns `true` when sampling should run.
    pub fn on_state_change(&mut self, state: EmbeddedPlayerState) -> bool {
        match state {
            EmbeddedPlayerState::Playing => self.set_phase(LoaderPhase::Playing),
            EmbeddedPlayerState::Paused => self.set_phase(LoaderPhase::Paused),
            EmbeddedPlayerState::Ended => self.set_phase(LoaderPhase::Ended),
            _ => {}
        }
        state == EmbeddedPlayerState::Playing
    }

    /// Replaces any running sampler; at most one runs per player.
    pub fn start_sampler(&mut self, sampler: Sampler) {
        self.stop_sampler();
        self.sampler = Some(sampler);
    }

    pub fn stop_sampler(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
    }

    pub fn fail(&mut self) {
        self.stop_sampler();
        self.set_phase(LoaderPhase::ErrorState);
    }

    /// Stops timers, then destroys the player. Destruction failures are
    /// logged and swallowed.
    pub fn teardown(&mut self) {
        self.stop_sampler();
        self.ready = false;

        let Some(mut player) = self.player.take() else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| player.destroy())) {
            Ok(Ok(())) => debug!("Embedded player destroyed"),
            Ok(Err(e)) => debug!("Player destroy warning: {}", e),
            Err(_) => warn!("Embedded player panicked during destroy"),
        }
    }
}

impl Default for EmbeddedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EmbeddedSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
