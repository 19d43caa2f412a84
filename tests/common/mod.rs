use mockito::{Server, ServerGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use tourplay::config::Config;
use tourplay::models::{EngineEvent, EngineState};
use tourplay::player::{EngineHandle, EngineHosts, ResourceRegistry, spawn_engine};

/// How long a test waits for the engine before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A headless engine wired to a local mock stream service.
pub struct TestContext {
    pub server: ServerGuard,
    pub handle: EngineHandle,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    pub registry: ResourceRegistry,
    pub seen: Vec<EngineEvent>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let server = Server::new_async().await;

        let mut config = Config::default();
        config.stream.base_url = Some(server.url());
        config.network.connection_timeout = 5;
        configure(&mut config);

        let hosts = EngineHosts::headless(&config).expect("Failed to create headless hosts");
        let registry = hosts.registry.clone();
        let handle = spawn_engine(&config, hosts);
        let events = handle
            .take_event_receiver()
            .expect("Event receiver already taken");

        Self {
            server,
            handle,
            events,
            registry,
            seen: Vec::new(),
        }
    }

    /// Consumes events until the engine reports `state`.
    pub async fn wait_for_state(&mut self, state: EngineState) {
        let expected = EngineEvent::StateChanged { state };
        self.wait_for(|event| *event == expected).await;
    }

    /// Consumes events until one matches, recording everything seen.
    pub async fn wait_for(&mut self, matches: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("Engine closed");
                self.seen.push(event.clone());
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out; saw {:?}", self.seen))
    }
}
