//! Connection manager: runs the lifecycle state machine against real
//! bindings and a real timer.
//!
//! One task processes binding events, the reconnect timer, and
//! cancellation strictly one at a time, so disposal of a binding always
//! completes before the next attempt starts.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use webcmd_core::{
    ConnectionLifecycle, Endpoint, Generation, LifecycleAction, LifecycleEvent, ReconnectPolicy,
    TransportSignal,
};

use crate::binding::{BindingEvent, TransportBinding};
use crate::surface::{announce, TerminalSurface};
use crate::transport::Connector;

/// Where to connect and how to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub policy: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

pub struct ConnectionManager<C, S> {
    config: ClientConfig,
    connector: Arc<C>,
    surface: Arc<Mutex<S>>,
    input: broadcast::Sender<Vec<u8>>,
}

impl<C: Connector, S: TerminalSurface> ConnectionManager<C, S> {
    pub fn new(
        config: ClientConfig,
        connector: Arc<C>,
        surface: Arc<Mutex<S>>,
        input: broadcast::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            config,
            connector,
            surface,
            input,
        }
    }

    /// Run the connect / retry cycle until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let lifecycle =
            ConnectionLifecycle::new(self.config.endpoint.to_string(), self.config.policy);
        let mut driver = Driver {
            manager: self,
            lifecycle,
            binding: None,
            retry_at: None,
            events_tx,
        };

        tracing::info!(
            endpoint = %driver.manager.config.endpoint,
            retry_delay_ms = driver.manager.config.policy.retry_delay.as_millis() as u64,
            "connection manager starting"
        );
        let actions = driver.lifecycle.start();
        driver.apply(actions).await;

        loop {
            let retry_at = driver.retry_at;
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => LifecycleEvent::Stop,
                Some(ev) = events_rx.recv() => {
                    let BindingEvent { generation, signal } = ev;
                    tracing::debug!(generation, signal = ?signal, "binding event");
                    LifecycleEvent::Transport { generation, signal }
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    driver.retry_at = None;
                    LifecycleEvent::TimerFired
                }
            };

            let stopping = event == LifecycleEvent::Stop;
            let opened = match event {
                LifecycleEvent::Transport {
                    generation,
                    signal: TransportSignal::Open,
                } => Some(generation),
                _ => None,
            };
            let actions = driver.lifecycle.handle(event);
            driver.apply(actions).await;
            if let Some(generation) = opened {
                driver.release(generation);
            }
            if stopping {
                break;
            }
        }

        tracing::info!(
            attempts = driver.lifecycle.attempts(),
            "connection manager stopped"
        );
    }
}

struct Driver<C, S> {
    manager: ConnectionManager<C, S>,
    lifecycle: ConnectionLifecycle,
    binding: Option<TransportBinding>,
    retry_at: Option<Instant>,
    events_tx: mpsc::UnboundedSender<BindingEvent>,
}

impl<C: Connector, S: TerminalSurface> Driver<C, S> {
    /// Start the byte flow of the live binding once its open is announced.
    fn release(&self, generation: Generation) {
        if let Some(binding) = self.binding.as_ref().filter(|b| b.generation() == generation) {
            binding.release();
        }
    }

    async fn apply(&mut self, actions: Vec<LifecycleAction>) {
        for action in actions {
            match action {
                LifecycleAction::Announce(announcement) => {
                    announce(&self.manager.surface, &announcement).await;
                }
                LifecycleAction::Bind { generation } => {
                    if let Some(mut stale) = self.binding.take() {
                        tracing::warn!(
                            generation = stale.generation(),
                            "binding still attached at rebind, disposing"
                        );
                        stale.dispose().await;
                    }
                    tracing::debug!(generation, attempt = self.lifecycle.attempts(), "connecting");
                    let connect = self.manager.connector.connect(&self.manager.config.endpoint);
                    self.binding = Some(TransportBinding::attach(
                        generation,
                        connect,
                        Arc::clone(&self.manager.surface),
                        self.manager.input.clone(),
                        self.events_tx.clone(),
                    ));
                }
                LifecycleAction::Dispose { generation } => {
                    if let Some(mut binding) = self.binding.take() {
                        if binding.generation() != generation {
                            tracing::warn!(
                                expected = generation,
                                actual = binding.generation(),
                                "disposing binding with unexpected generation"
                            );
                        }
                        binding.dispose().await;
                    }
                }
                LifecycleAction::ArmTimer { after } => {
                    tracing::info!(
                        endpoint = %self.manager.config.endpoint,
                        after_ms = after.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    self.retry_at = Some(Instant::now() + after);
                }
                LifecycleAction::DisarmTimer => {
                    self.retry_at = None;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::surface::testing::RecordingSurface;
    use crate::transport::{Transport, TransportEvent, TransportPeer};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Scripted outcome of one connect call.
    enum Outcome {
        Refuse,
        Accept(Transport),
    }

    /// Connector that replays scripted outcomes and records when it was called.
    #[derive(Default)]
    struct ScriptedConnector {
        script: StdMutex<VecDeque<Outcome>>,
        calls: StdMutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn push_refuse(&self) {
            self.script.lock().unwrap().push_back(Outcome::Refuse);
        }

        fn push_accept(&self) -> TransportPeer {
            let (transport, peer) = Transport::pair(16);
            self.script
                .lock()
                .unwrap()
                .push_back(Outcome::Accept(transport));
            peer
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self, _endpoint: &Endpoint) -> BoxFuture<'static, Result<Transport, TransportError>> {
            self.calls.lock().unwrap().push(Instant::now());
            match self.script.lock().unwrap().pop_front() {
                Some(Outcome::Accept(transport)) => async move { Ok(transport) }.boxed(),
                Some(Outcome::Refuse) => {
                    async { Err(TransportError::refused()) }.boxed()
                }
                // Unscripted attempts never complete.
                None => futures_util::future::pending().boxed(),
            }
        }
    }

    struct Harness {
        connector: Arc<ScriptedConnector>,
        recorder: RecordingSurface,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    const EP: &str = "ws://localhost:8000/ws";

    fn start(connector: Arc<ScriptedConnector>) -> Harness {
        let recorder = RecordingSurface::default();
        let surface = Arc::new(Mutex::new(recorder.clone()));
        let (input, _) = broadcast::channel(16);
        let config = ClientConfig::new(Endpoint::parse(EP).unwrap());
        let manager = ConnectionManager::new(config, Arc::clone(&connector), surface, input);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(manager.run(cancel.clone()));
        Harness {
            connector,
            recorder,
            cancel,
            task,
        }
    }

    /// Let spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn connecting_line() -> String {
        format!("Connecting to {EP}...")
    }

    #[tokio::test(start_paused = true)]
    async fn open_announces_connected_once() {
        let connector = Arc::new(ScriptedConnector::default());
        let _peer = connector.push_accept();
        let h = start(connector);
        settle().await;

        assert_eq!(h.recorder.lines(), vec![connecting_line(), "connected.".into()]);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_bytes_follow_connected() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.push_accept();
        // Bytes already waiting when the socket opens, like a server replay.
        peer.incoming
            .send(TransportEvent::Data(b"REPLAY\r\n".to_vec()))
            .await
            .unwrap();
        let h = start(connector);
        settle().await;

        assert_eq!(
            h.recorder.lines(),
            vec![connecting_line(), "connected.".into(), "REPLAY".into()]
        );
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_cycles_with_fixed_delay() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.push_refuse();
        let h = start(Arc::clone(&connector));
        settle().await;

        assert_eq!(
            h.recorder.lines(),
            vec![
                connecting_line(),
                "websocket error.".into(),
                "Disconnected.".into(),
                "Reconnecting...".into(),
            ]
        );
        assert_eq!(connector.calls().len(), 1);

        // Nothing happens before the delay elapses.
        tokio::time::advance(Duration::from_millis(4_999)).await;
        settle().await;
        assert_eq!(connector.calls().len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.calls().len(), 2);
        assert_eq!(h.recorder.lines().last().unwrap(), &connecting_line());

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_interval_is_constant_across_cycles() {
        let connector = Arc::new(ScriptedConnector::default());
        for _ in 0..4 {
            connector.push_refuse();
        }
        let h = start(Arc::clone(&connector));
        settle().await;
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(5_000)).await;
            settle().await;
        }

        let calls = connector.calls();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(5_000));
        }
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_close_reopen_sequence_is_exact() {
        let connector = Arc::new(ScriptedConnector::default());
        let first = connector.push_accept();
        let second = connector.push_accept();
        let h = start(Arc::clone(&connector));
        settle().await;

        first
            .incoming
            .send(TransportEvent::Data(b"first\r\n".to_vec()))
            .await
            .unwrap();
        drop(first);
        settle().await;

        tokio::time::advance(Duration::from_millis(5_000)).await;
        settle().await;

        second
            .incoming
            .send(TransportEvent::Data(b"second\r\n".to_vec()))
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            h.recorder.lines(),
            vec![
                connecting_line(),
                "connected.".into(),
                "first".into(),
                "Disconnected.".into(),
                "Reconnecting...".into(),
                connecting_line(),
                "connected.".into(),
                "second".into(),
            ]
        );
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_binding_bytes_never_reach_surface() {
        let connector = Arc::new(ScriptedConnector::default());
        let first = connector.push_accept();
        let h = start(Arc::clone(&connector));
        settle().await;

        // The peer keeps a sender alive but reports an error; the binding
        // is torn down only by stop.
        first
            .incoming
            .send(TransportEvent::Error("reset".into()))
            .await
            .unwrap();
        settle().await;
        h.cancel.cancel();
        h.task.await.unwrap();

        let _ = first
            .incoming
            .send(TransportEvent::Data(b"ghost".to_vec()))
            .await;
        settle().await;
        assert!(!h.recorder.text().contains("ghost"));
        assert_eq!(
            h.recorder.lines(),
            vec![connecting_line(), "connected.".into(), "websocket error.".into()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_retry_window_cancels_timer() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.push_refuse();
        let h = start(Arc::clone(&connector));
        settle().await;

        h.cancel.cancel();
        h.task.await.unwrap();

        tokio::time::advance(Duration::from_millis(60_000)).await;
        settle().await;
        assert_eq!(connector.calls().len(), 1);
    }
}
