//! Connectivity tracking.
//!
//! Transitions are published on a `watch` channel. A reconnect carries
//! `just_reconnected = true`; consumers react to it once per change
//! notification, never by polling the current value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::http::{HttpRequest, Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
  pub is_online: bool,
  /// Set only on the notification for an offline -> online transition
  pub just_reconnected: bool,
}

impl ConnectivityState {
  pub fn online() -> Self {
    Self {
      is_online: true,
      just_reconnected: false,
    }
  }

  pub fn offline() -> Self {
    Self {
      is_online: false,
      just_reconnected: false,
    }
  }
}

pub struct NetworkMonitor {
  tx: watch::Sender<ConnectivityState>,
}

impl NetworkMonitor {
  pub fn new(initially_online: bool) -> Self {
    let initial = if initially_online {
      ConnectivityState::online()
    } else {
      ConnectivityState::offline()
    };
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  /// Current state.
  pub fn state(&self) -> ConnectivityState {
    *self.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.state().is_online
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.tx.subscribe()
  }

  /// Report the platform signal. Returns `true` when it was a transition.
  ///
  /// Repeating the current state notifies nobody.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|state| {
      if state.is_online == online {
        return false;
      }

      *state = ConnectivityState {
        is_online: online,
        just_reconnected: online,
      };
      if online {
        info!("connectivity restored");
      } else {
        info!("connectivity lost");
      }
      true
    })
  }

  /// Derive the platform signal by probing `url` every `interval`.
  ///
  /// Any HTTP response counts as online; a transport error counts as offline.
  /// The task ends when the monitor is dropped.
  pub fn spawn_probe<N>(self: &Arc<Self>, network: N, url: Url, interval: Duration) -> JoinHandle<()>
  where
    N: Network + 'static,
  {
    let monitor = Arc::downgrade(self);

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;

        let online = match network.fetch(&HttpRequest::get(url.clone())).await {
          Ok(response) => {
            debug!("probe {} -> {}", url, response.status);
            true
          }
          Err(e) => {
            debug!("probe {} failed: {}", url, e);
            false
          }
        };

        match monitor.upgrade() {
          Some(monitor) => {
            monitor.set_online(online);
          }
          None => break,
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::{url, FakeNetwork};

  #[test]
  fn test_reconnect_is_flagged() {
    let monitor = NetworkMonitor::new(true);
    assert!(monitor.set_online(false));
    assert_eq!(monitor.state(), ConnectivityState::offline());

    assert!(monitor.set_online(true));
    assert_eq!(
      monitor.state(),
      ConnectivityState {
        is_online: true,
        just_reconnected: true,
      }
    );
  }

  #[test]
  fn test_repeated_state_is_not_a_transition() {
    let monitor = NetworkMonitor::new(true);
    assert!(!monitor.set_online(true));

    monitor.set_online(false);
    assert!(!monitor.set_online(false));
  }

  #[tokio::test]
  async fn test_one_notification_per_transition() {
    let monitor = NetworkMonitor::new(false);
    let mut rx = monitor.subscribe();

    monitor.set_online(true);
    monitor.set_online(true);

    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().just_reconnected);
    assert!(!rx.has_changed().unwrap());

    monitor.set_online(false);
    rx.changed().await.unwrap();
    let state = *rx.borrow_and_update();
    assert!(!state.is_online);
    assert!(!state.just_reconnected);
  }

  #[tokio::test]
  async fn test_probe_reports_transitions() {
    let network = FakeNetwork::new();
    network.set_online(false);
    let monitor = Arc::new(NetworkMonitor::new(true));
    let mut rx = monitor.subscribe();

    let probe = monitor.spawn_probe(
      network.clone(),
      url("/api/health"),
      Duration::from_millis(5),
    );

    rx.changed().await.unwrap();
    assert!(!rx.borrow_and_update().is_online);

    network.set_online(true);
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().just_reconnected);

    probe.abort();
  }
}
