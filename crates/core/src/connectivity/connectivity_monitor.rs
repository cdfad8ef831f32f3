use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

const RECONNECT_CHANNEL_CAPACITY: usize = 16;

/// Link type reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Wifi,
    Cellular,
    Wired,
    Other,
    Unknown,
}

/// One reachability callback from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPath {
    pub is_satisfied: bool,
    pub is_expensive: bool,
    pub transport: Transport,
}

impl NetworkPath {
    pub fn online(transport: Transport) -> Self {
        Self {
            is_satisfied: true,
            is_expensive: matches!(transport, Transport::Cellular),
            transport,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_satisfied: false,
            is_expensive: false,
            transport: Transport::Unknown,
        }
    }
}

/// Current connectivity as seen by the rest of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub is_expensive: bool,
    pub transport: Transport,
    /// False until the first platform callback arrives.
    pub observed: bool,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            is_connected: false,
            is_expensive: false,
            transport: Transport::Unknown,
            observed: false,
        }
    }
}

/// Emitted on every disconnected -> connected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnected {
    pub transport: Transport,
}

/// Publishes reachability state and pushes a reconnect event on every
/// offline -> online transition.
///
/// Before the first platform callback the state is "unknown" and treated as
/// offline. Reconnect events are broadcast; receivers run on their own tasks,
/// so the platform callback never waits on a drain or refresh.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    reconnects: broadcast::Sender<Reconnected>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectivityState::default());
        let (reconnects, _) = broadcast::channel(RECONNECT_CHANNEL_CAPACITY);
        Self { state, reconnects }
    }

    /// Feed a platform reachability callback into the monitor.
    pub fn report(&self, path: NetworkPath) {
        let next = ConnectivityState {
            is_connected: path.is_satisfied,
            is_expensive: path.is_expensive,
            transport: path.transport,
            observed: true,
        };
        let previous = self.state.send_replace(next);

        if !previous.is_connected && next.is_connected {
            info!(
                "[Connectivity] Connection restored via {:?}",
                next.transport
            );
            // No receivers simply means nobody is listening yet.
            let _ = self.reconnects.send(Reconnected {
                transport: next.transport,
            });
        } else if previous.is_connected && !next.is_connected {
            info!("[Connectivity] Connection lost");
        } else {
            debug!(
                "[Connectivity] Path update connected={} expensive={} transport={:?}",
                next.is_connected, next.is_expensive, next.transport
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    pub fn current(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Watch the full state (for UI badges).
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Receive one event per offline -> online transition.
    pub fn reconnects(&self) -> broadcast::Receiver<Reconnected> {
        self.reconnects.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_state_is_offline() {
        let monitor = ConnectivityMonitor::new();
        assert!(!monitor.is_connected());
        assert!(!monitor.current().observed);
    }

    #[tokio::test]
    async fn reconnect_event_fires_only_on_transition() {
        let monitor = ConnectivityMonitor::new();
        let mut events = monitor.reconnects();

        monitor.report(NetworkPath::online(Transport::Wifi));
        monitor.report(NetworkPath::online(Transport::Cellular));
        monitor.report(NetworkPath::offline());
        monitor.report(NetworkPath::online(Transport::Wifi));

        assert_eq!(
            events.recv().await.unwrap(),
            Reconnected {
                transport: Transport::Wifi
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            Reconnected {
                transport: Transport::Wifi
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn cellular_path_is_expensive() {
        let monitor = ConnectivityMonitor::new();
        monitor.report(NetworkPath::online(Transport::Cellular));
        let state = monitor.current();
        assert!(state.is_connected);
        assert!(state.is_expensive);
        assert!(state.observed);
    }
}
