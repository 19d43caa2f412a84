#![cfg(test)]

/// Controllable host fakes for engine and loader tests
pub mod fakes {
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    use crate::models::ContainerId;
    use crate::player::stream_fetcher::{StreamClient, StreamRequest};
    use crate::player::traits::{
        EmbedOptions, EmbeddedEvent, EmbeddedPlayer, EmbeddedPlayerApi, MediaSurface, ScriptHost,
    };
    use crate::utils::StreamError;

    /// Ordered record of host calls shared between fakes.
    #[derive(Clone, Default)]
    pub struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        pub fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        pub fn count(&self, entry: &str) -> usize {
            self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
        }

        /// Index of the first entry starting with `prefix`.
        pub fn position(&self, prefix: &str) -> Option<usize> {
            self.0.lock().unwrap().iter().position(|e| e.starts_with(prefix))
        }
    }

    #[derive(Default)]
    struct SurfaceState {
        loaded: Option<String>,
        position: f64,
        paused: bool,
        seeks: Vec<f64>,
        reject_play: bool,
        fail_load: bool,
    }

    /// Media surface whose position is set by the test.
    #[derive(Clone)]
    pub struct FakeSurface {
        log: CallLog,
        state: Arc<Mutex<SurfaceState>>,
    }

    impl FakeSurface {
        pub fn new(log: CallLog) -> Self {
            Self {
                log,
                state: Arc::new(Mutex::new(SurfaceState {
                    paused: true,
                    ..SurfaceState::default()
                })),
            }
        }

        pub fn set_position(&self, position: f64) {
            self.state.lock().unwrap().position = position;
        }

        pub fn reject_play(&self) {
            self.state.lock().unwrap().reject_play = true;
        }

        pub fn fail_load(&self) {
            self.state.lock().unwrap().fail_load = true;
        }

        pub fn loaded(&self) -> Option<String> {
            self.state.lock().unwrap().loaded.clone()
        }

        pub fn paused(&self) -> bool {
            self.state.lock().unwrap().paused
        }

        pub fn seeks(&self) -> Vec<f64> {
            self.state.lock().unwrap().seeks.clone()
        }
    }

    #[async_trait]
    impl MediaSurface for FakeSurface {
        async fn load_media(&mut self, url: &str) -> Result<()> {
            self.log.push(format!("surface.load:{}", url));
            let mut state = self.state.lock().unwrap();
            if state.fail_load {
                return Err(anyhow!("unsupported media"));
            }
            state.loaded = Some(url.to_string());
            state.position = 0.0;
            state.paused = true;
            Ok(())
        }

        async fn play(&mut self) -> Result<()> {
            self.log.push("surface.play");
            let mut state = self.state.lock().unwrap();
            if state.reject_play {
                return Err(anyhow!("play() request was blocked by autoplay policy"));
            }
            state.paused = false;
            Ok(())
        }

        async fn pause(&mut self) -> Result<()> {
            self.log.push("surface.pause");
            self.state.lock().unwrap().paused = true;
            Ok(())
        }

        async fn seek(&mut self, position_seconds: f64) -> Result<()> {
            self.log.push("surface.seek");
            let mut state = self.state.lock().unwrap();
            state.position = position_seconds;
            state.seeks.push(position_seconds);
            Ok(())
        }

        async fn get_position(&self) -> Option<f64> {
            let state = self.state.lock().unwrap();
            state.loaded.as_ref().map(|_| state.position)
        }

        async fn is_paused(&self) -> bool {
            self.state.lock().unwrap().paused
        }

        async fn unload(&mut self) -> Result<()> {
            self.log.push("surface.unload");
            let mut state = self.state.lock().unwrap();
            state.loaded = None;
            state.paused = true;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeScriptHost {
        injections: Mutex<HashMap<String, usize>>,
    }

    impl FakeScriptHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn injection_count(&self, src: &str) -> usize {
            self.injections
                .lock()
                .unwrap()
                .get(src)
                .copied()
                .unwrap_or(0)
        }
    }

    impl ScriptHost for FakeScriptHost {
        fn has_script(&self, src: &str) -> bool {
            self.injection_count(src) > 0
        }

        fn inject_script(&self, src: &str) -> Result<()> {
            *self
                .injections
                .lock()
                .unwrap()
                .entry(src.to_string())
                .or_insert(0) += 1;
            Ok(())
        }
    }

    struct PlayerShared {
        time: Mutex<Option<f64>>,
        fail_destroy: AtomicBool,
    }

    /// Vendor player that records calls and reports a test-set time.
    #[derive(Clone)]
    pub struct FakeEmbeddedPlayer {
        log: CallLog,
        shared: Arc<PlayerShared>,
    }

    impl FakeEmbeddedPlayer {
        pub fn new(log: CallLog) -> Self {
            Self {
                log,
                shared: Arc::new(PlayerShared {
                    time: Mutex::new(Some(0.0)),
                    fail_destroy: AtomicBool::new(false),
                }),
            }
        }

        /// `None` makes `current_time` fail, as it does mid-seek.
        pub fn set_time(&self, time: Option<f64>) {
            *self.shared.time.lock().unwrap() = time;
        }

        pub fn fail_destroy(&self) {
            self.shared.fail_destroy.store(true, Ordering::SeqCst);
        }
    }

    impl EmbeddedPlayer for FakeEmbeddedPlayer {
        fn play(&mut self) -> Result<()> {
            self.log.push("embedded.play");
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.log.push("embedded.pause");
            Ok(())
        }

        fn seek_to(&mut self, seconds: f64, _allow_seek_ahead: bool) -> Result<()> {
            self.log.push(format!("embedded.seek:{}", seconds));
            *self.shared.time.lock().unwrap() = Some(seconds);
            Ok(())
        }

        fn current_time(&self) -> Result<f64> {
            self.shared
                .time
                .lock()
                .unwrap()
                .ok_or_else(|| anyhow!("player is loading"))
        }

        fn destroy(&mut self) -> Result<()> {
            self.log.push("embedded.destroy");
            if self.shared.fail_destroy.load(Ordering::SeqCst) {
                return Err(anyhow!("Cannot read properties of null (reading 'src')"));
            }
            Ok(())
        }
    }

    pub struct CreatedPlayer {
        pub container: ContainerId,
        pub options: EmbedOptions,
        pub events: mpsc::UnboundedSender<EmbeddedEvent>,
        pub player: FakeEmbeddedPlayer,
    }

    /// Vendor API whose readiness is flipped by the test.
    pub struct FakeEmbeddedApi {
        log: CallLog,
        ready: AtomicBool,
        fail_create: AtomicBool,
        created: Mutex<Vec<CreatedPlayer>>,
    }

    impl FakeEmbeddedApi {
        pub fn new(log: CallLog) -> Self {
            Self {
                log,
                ready: AtomicBool::new(false),
                fail_create: AtomicBool::new(false),
                created: Mutex::new(Vec::new()),
            }
        }

        pub fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }

        pub fn fail_create(&self) {
            self.fail_create.store(true, Ordering::SeqCst);
        }

        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        pub fn player(&self, index: usize) -> FakeEmbeddedPlayer {
            self.created.lock().unwrap()[index].player.clone()
        }

        pub fn options(&self, index: usize) -> EmbedOptions {
            self.created.lock().unwrap()[index].options.clone()
        }

        pub fn container(&self, index: usize) -> ContainerId {
            self.created.lock().unwrap()[index].container.clone()
        }

        /// Delivers a vendor callback. Returns `false` once nobody listens.
        pub fn emit(&self, index: usize, event: EmbeddedEvent) -> bool {
            self.created.lock().unwrap()[index].events.send(event).is_ok()
        }
    }

    impl EmbeddedPlayerApi for FakeEmbeddedApi {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn create_player(
            &self,
            container: &ContainerId,
            options: &EmbedOptions,
            events: mpsc::UnboundedSender<EmbeddedEvent>,
        ) -> Result<Box<dyn EmbeddedPlayer>> {
            self.log.push("embedded.create");
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(anyhow!("YT.Player is not a constructor"));
            }
            let player = FakeEmbeddedPlayer::new(self.log.clone());
            player.set_time(Some(options.start_seconds as f64));
            self.created.lock().unwrap().push(CreatedPlayer {
                container: container.clone(),
                options: options.clone(),
                events,
                player: player.clone(),
            });
            Ok(Box::new(player))
        }
    }

    type Responder = oneshot::Sender<Result<Bytes, StreamError>>;

    #[derive(Default)]
    struct GateState {
        requests: Vec<StreamRequest>,
        pending: HashMap<usize, Responder>,
    }

    /// Stream transport that holds every request until the test responds.
    #[derive(Default)]
    pub struct GatedStreamClient {
        state: Mutex<GateState>,
    }

    impl GatedStreamClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn request_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        pub fn request(&self, index: usize) -> StreamRequest {
            self.state.lock().unwrap().requests[index].clone()
        }

        /// Completes request `index`. Returns `false` if it was abandoned.
        pub fn respond(&self, index: usize, result: Result<Bytes, StreamError>) -> bool {
            let responder = self.state.lock().unwrap().pending.remove(&index);
            responder.is_some_and(|tx| tx.send(result).is_ok())
        }

        pub async fn wait_for_requests(&self, count: usize) {
            for _ in 0..10_000 {
                if self.request_count() >= count {
                    return;
                }
                tokio::task::yield_now().await;
            }
            panic!(
                "expected {} stream requests, saw {}",
                count,
                self.request_count()
            );
        }
    }

    #[async_trait]
    impl StreamClient for GatedStreamClient {
        async fn fetch(&self, request: &StreamRequest) -> Result<Bytes, StreamError> {
            let (tx, rx) = oneshot::channel();
            {
                let mut state = self.state.lock().unwrap();
                let index = state.requests.len();
                state.requests.push(request.clone());
                state.pending.insert(index, tx);
            }
            rx.await
                .unwrap_or_else(|_| Err(StreamError::Network("gate dropped".to_string())))
        }
    }
}

/// Common test utilities
pub mod common {
    use tokio::sync::mpsc;

    use crate::models::EngineEvent;

    /// Lets spawned tasks run without advancing paused time.
    pub async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    /// Everything currently buffered on the event channel.
    pub fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
