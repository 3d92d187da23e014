//! Connection lifecycle state machine.
//!
//! Pure, deterministic, no IO and no clock. The async driver feeds
//! [`LifecycleEvent`]s in and executes the returned [`LifecycleAction`]s in
//! order.
//!
//! ```text
//!   Idle --Start--> Connecting --Open--> Open
//!                   |   ^  (Error: announce only)  |
//!                   |   |                          |
//!                 Close TimerFired               Close
//!                   v   |                          |
//!                   Retrying <---------------------+
//! ```
//!
//! Every binding carries a [`Generation`]. Transport signals tagged with a
//! generation other than the live one are stale and ignored, so a late close
//! from a disposed binding can never schedule a second retry.

use std::time::Duration;

use crate::announce::Announcement;

/// Fixed delay between a close and the next connection attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);

/// Reconnect policy: a constant delay, no retry limit, no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }
}

/// Identifies one transport binding within a session.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not started.
    Idle,
    /// A binding exists and its socket has not opened yet.
    Connecting { generation: Generation },
    /// The binding's socket is open.
    Open { generation: Generation },
    /// No binding; the reconnect timer is armed.
    Retrying,
    /// Stopped by the owner. Absorbs every further event.
    Stopped,
}

impl ConnectionState {
    /// Generation of the live binding, if any.
    pub fn generation(&self) -> Option<Generation> {
        match self {
            ConnectionState::Connecting { generation } | ConnectionState::Open { generation } => {
                Some(*generation)
            }
            _ => None,
        }
    }
}

/// What a transport binding reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Open,
    Error,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Transport {
        generation: Generation,
        signal: TransportSignal,
    },
    TimerFired,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Write a styled announcement to the surface.
    Announce(Announcement),
    /// Open a socket and bind it to the surface under `generation`.
    Bind { generation: Generation },
    /// Detach and release the binding for `generation`.
    Dispose { generation: Generation },
    /// Arm the single reconnect timer.
    ArmTimer { after: Duration },
    /// Drop the pending reconnect timer.
    DisarmTimer,
}

/// Drives one session's connect / retry cycle.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    endpoint: String,
    policy: ReconnectPolicy,
    state: ConnectionState,
    next_generation: Generation,
    attempts: u64,
}

impl ConnectionLifecycle {
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            state: ConnectionState::Idle,
            next_generation: 1,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn binding_active(&self) -> bool {
        self.state.generation().is_some()
    }

    pub fn timer_pending(&self) -> bool {
        self.state == ConnectionState::Retrying
    }

    pub fn start(&mut self) -> Vec<LifecycleAction> {
        self.handle(LifecycleEvent::Start)
    }

    pub fn stop(&mut self) -> Vec<LifecycleAction> {
        self.handle(LifecycleEvent::Stop)
    }

    /// Apply one event and return the actions to perform, in order.
    pub fn handle(&mut self, event: LifecycleEvent) -> Vec<LifecycleAction> {
        match (self.state, event) {
            (ConnectionState::Stopped, _) => Vec::new(),
            (state, LifecycleEvent::Stop) => {
                self.state = ConnectionState::Stopped;
                match state {
                    ConnectionState::Connecting { generation }
                    | ConnectionState::Open { generation } => {
                        vec![LifecycleAction::Dispose { generation }]
                    }
                    ConnectionState::Retrying => vec![LifecycleAction::DisarmTimer],
                    _ => Vec::new(),
                }
            }
            (ConnectionState::Idle, LifecycleEvent::Start) => self.attempt_connect(),
            (_, LifecycleEvent::Start) => Vec::new(),
            (ConnectionState::Retrying, LifecycleEvent::TimerFired) => self.attempt_connect(),
            (_, LifecycleEvent::TimerFired) => Vec::new(),
            (state, LifecycleEvent::Transport { generation, signal }) => {
                if state.generation() != Some(generation) {
                    return Vec::new();
                }
                self.on_transport(state, generation, signal)
            }
        }
    }

    fn on_transport(
        &mut self,
        state: ConnectionState,
        generation: Generation,
        signal: TransportSignal,
    ) -> Vec<LifecycleAction> {
        match (state, signal) {
            (ConnectionState::Connecting { .. }, TransportSignal::Open) => {
                self.state = ConnectionState::Open { generation };
                vec![LifecycleAction::Announce(Announcement::Connected)]
            }
            (_, TransportSignal::Open) => Vec::new(),
            // Non-terminal: the close that follows drives the transition.
            (_, TransportSignal::Error) => {
                vec![LifecycleAction::Announce(Announcement::SocketError)]
            }
            (_, TransportSignal::Close) => {
                self.state = ConnectionState::Retrying;
                vec![
                    LifecycleAction::Announce(Announcement::Disconnected),
                    LifecycleAction::Dispose { generation },
                    LifecycleAction::ArmTimer {
                        after: self.policy.retry_delay,
                    },
                    LifecycleAction::Announce(Announcement::Reconnecting),
                ]
            }
        }
    }

    fn attempt_connect(&mut self) -> Vec<LifecycleAction> {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.attempts += 1;
        self.state = ConnectionState::Connecting { generation };
        vec![
            LifecycleAction::Announce(Announcement::Connecting {
                endpoint: self.endpoint.clone(),
            }),
            LifecycleAction::Bind { generation },
        ]
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const EP: &str = "ws://localhost:8000/ws";

    fn lifecycle() -> ConnectionLifecycle {
        ConnectionLifecycle::new(EP, ReconnectPolicy::default())
    }

    fn signal(generation: Generation, signal: TransportSignal) -> LifecycleEvent {
        LifecycleEvent::Transport { generation, signal }
    }

    fn connecting() -> LifecycleAction {
        LifecycleAction::Announce(Announcement::Connecting {
            endpoint: EP.to_owned(),
        })
    }

    #[test]
    fn default_policy_is_five_seconds() {
        assert_eq!(ReconnectPolicy::default().retry_delay, Duration::from_millis(5_000));
    }

    #[test]
    fn start_announces_then_binds() {
        let mut lc = lifecycle();
        assert_eq!(
            lc.start(),
            vec![connecting(), LifecycleAction::Bind { generation: 1 }]
        );
        assert_eq!(lc.state(), ConnectionState::Connecting { generation: 1 });
        assert_eq!(lc.attempts(), 1);
    }

    #[test]
    fn second_start_is_ignored() {
        let mut lc = lifecycle();
        lc.start();
        assert!(lc.start().is_empty());
        assert_eq!(lc.attempts(), 1);
    }

    #[test]
    fn open_announces_connected() {
        let mut lc = lifecycle();
        lc.start();
        let actions = lc.handle(signal(1, TransportSignal::Open));
        assert_eq!(actions, vec![LifecycleAction::Announce(Announcement::Connected)]);
        assert_eq!(lc.state(), ConnectionState::Open { generation: 1 });

        // A duplicate open is a no-op.
        assert!(lc.handle(signal(1, TransportSignal::Open)).is_empty());
    }

    #[test]
    fn error_is_non_terminal() {
        let mut lc = lifecycle();
        lc.start();
        let actions = lc.handle(signal(1, TransportSignal::Error));
        assert_eq!(
            actions,
            vec![LifecycleAction::Announce(Announcement::SocketError)]
        );
        assert_eq!(lc.state(), ConnectionState::Connecting { generation: 1 });
        assert!(lc.binding_active());
    }

    #[test]
    fn close_disposes_and_arms_timer() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Open));
        let actions = lc.handle(signal(1, TransportSignal::Close));
        assert_eq!(
            actions,
            vec![
                LifecycleAction::Announce(Announcement::Disconnected),
                LifecycleAction::Dispose { generation: 1 },
                LifecycleAction::ArmTimer {
                    after: Duration::from_millis(5_000)
                },
                LifecycleAction::Announce(Announcement::Reconnecting),
            ]
        );
        assert!(lc.timer_pending());
        assert!(!lc.binding_active());
    }

    #[test]
    fn close_without_open_also_retries() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Error));
        let actions = lc.handle(signal(1, TransportSignal::Close));
        assert!(actions.contains(&LifecycleAction::Dispose { generation: 1 }));
        assert_eq!(lc.state(), ConnectionState::Retrying);
    }

    #[test]
    fn timer_fire_reconnects_with_new_generation() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Close));
        let actions = lc.handle(LifecycleEvent::TimerFired);
        assert_eq!(
            actions,
            vec![connecting(), LifecycleAction::Bind { generation: 2 }]
        );
        assert_eq!(lc.attempts(), 2);
    }

    #[test]
    fn stale_close_does_not_double_schedule() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Close));
        // Second close for the disposed binding.
        assert!(lc.handle(signal(1, TransportSignal::Close)).is_empty());
        lc.handle(LifecycleEvent::TimerFired);
        // Late close from generation 1 while generation 2 is connecting.
        assert!(lc.handle(signal(1, TransportSignal::Close)).is_empty());
        assert_eq!(lc.state(), ConnectionState::Connecting { generation: 2 });
    }

    #[test]
    fn stray_timer_is_ignored() {
        let mut lc = lifecycle();
        lc.start();
        assert!(lc.handle(LifecycleEvent::TimerFired).is_empty());
        assert_eq!(lc.attempts(), 1);
    }

    #[test]
    fn retry_delay_never_grows() {
        let mut lc = lifecycle();
        lc.start();
        for generation in 1..=10 {
            let actions = lc.handle(signal(generation, TransportSignal::Close));
            assert!(actions.contains(&LifecycleAction::ArmTimer {
                after: Duration::from_millis(5_000)
            }));
            lc.handle(LifecycleEvent::TimerFired);
        }
        assert_eq!(lc.attempts(), 11);
    }

    #[test]
    fn stop_while_connected_disposes() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Open));
        assert_eq!(lc.stop(), vec![LifecycleAction::Dispose { generation: 1 }]);
        assert_eq!(lc.state(), ConnectionState::Stopped);
    }

    #[test]
    fn stop_while_retrying_disarms() {
        let mut lc = lifecycle();
        lc.start();
        lc.handle(signal(1, TransportSignal::Close));
        assert_eq!(lc.stop(), vec![LifecycleAction::DisarmTimer]);
    }

    #[test]
    fn stopped_absorbs_everything() {
        let mut lc = lifecycle();
        lc.stop();
        assert!(lc.start().is_empty());
        assert!(lc.handle(LifecycleEvent::TimerFired).is_empty());
        assert!(lc.handle(signal(1, TransportSignal::Close)).is_empty());
        assert!(lc.stop().is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Tracks the resources the actions create and release.
    #[derive(Default)]
    struct World {
        live: Vec<Generation>,
        timers: u32,
    }

    impl World {
        fn apply(&mut self, actions: &[LifecycleAction]) {
            for action in actions {
                match action {
                    LifecycleAction::Bind { generation } => self.live.push(*generation),
                    LifecycleAction::Dispose { generation } => {
                        self.live.retain(|g| g != generation)
                    }
                    LifecycleAction::ArmTimer { .. } => self.timers += 1,
                    LifecycleAction::DisarmTimer => self.timers -= 1,
                    LifecycleAction::Announce(_) => {}
                }
            }
        }
    }

    fn arb_event() -> impl Strategy<Value = LifecycleEvent> {
        let signal = prop_oneof![
            Just(TransportSignal::Open),
            Just(TransportSignal::Error),
            Just(TransportSignal::Close),
        ];
        prop_oneof![
            4 => (0u64..6, signal).prop_map(|(generation, signal)| {
                LifecycleEvent::Transport { generation, signal }
            }),
            2 => Just(LifecycleEvent::TimerFired),
            1 => Just(LifecycleEvent::Start),
        ]
    }

    proptest! {
        /// At most one binding and one timer, never both at once.
        #[test]
        fn binding_and_timer_alternate(
            events in proptest::collection::vec(arb_event(), 0..64),
        ) {
            let mut lc = ConnectionLifecycle::new("ws://h/ws", ReconnectPolicy::default());
            let mut world = World::default();
            world.apply(&lc.start());
            for event in events {
                // A fired timer is consumed by the driver before it reports.
                if event == LifecycleEvent::TimerFired && world.timers == 1 {
                    world.timers = 0;
                }
                world.apply(&lc.handle(event));
                prop_assert!(world.live.len() <= 1);
                prop_assert!(world.timers <= 1);
                prop_assert!(world.live.is_empty() || world.timers == 0);
                prop_assert_eq!(world.live.len() == 1, lc.binding_active());
            }
        }

        /// Each close of the live binding yields exactly one dispose and one timer.
        #[test]
        fn close_cycle_is_exact(
            events in proptest::collection::vec(arb_event(), 0..64),
        ) {
            let mut lc = ConnectionLifecycle::new("ws://h/ws", ReconnectPolicy::default());
            lc.start();
            for event in events {
                let live = lc.state().generation();
                let actions = lc.handle(event);
                let disposes = actions.iter().filter(|a| matches!(a, LifecycleAction::Dispose { .. })).count();
                let arms = actions.iter().filter(|a| matches!(a, LifecycleAction::ArmTimer { .. })).count();
                let closes_live = matches!(
                    event,
                    LifecycleEvent::Transport { generation, signal: TransportSignal::Close }
                        if Some(generation) == live
                );
                if closes_live {
                    prop_assert_eq!((disposes, arms), (1, 1));
                } else {
                    prop_assert_eq!((disposes, arms), (0, 0));
                }
            }
        }

        /// Stop always leaves nothing behind.
        #[test]
        fn stop_releases_everything(
            events in proptest::collection::vec(arb_event(), 0..32),
        ) {
            let mut lc = ConnectionLifecycle::new("ws://h/ws", ReconnectPolicy::default());
            let mut world = World::default();
            world.apply(&lc.start());
            for event in events {
                if event == LifecycleEvent::TimerFired && world.timers == 1 {
                    world.timers = 0;
                }
                world.apply(&lc.handle(event));
            }
            world.apply(&lc.stop());
            prop_assert!(world.live.is_empty());
            prop_assert_eq!(world.timers, 0);
        }
    }
}
