//! Replays the mutation queue when connectivity returns.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::http::Network;
use crate::monitor::ConnectivityState;
use crate::queue::{MutationQueue, SyncResult};

/// Something the UI should tell the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
  /// Went offline with this many writes pending
  Offline { pending: usize },
  /// A replay pass finished
  Synced(SyncResult),
  /// A reconnect arrived while a pass was still running
  AlreadyRunning,
}

impl fmt::Display for SyncNotice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Offline { pending: 0 } => write!(f, "Offline"),
      Self::Offline { pending } => write!(
        f,
        "Offline, {} {} pending",
        pending,
        plural(*pending, "change", "changes")
      ),
      Self::Synced(SyncResult {
        succeeded: 0,
        failed: 0,
      }) => write!(f, "Back online, nothing to sync"),
      Self::Synced(SyncResult { succeeded, failed }) => {
        write!(
          f,
          "{} {} synced",
          succeeded,
          plural(*succeeded, "request", "requests")
        )?;
        if *failed > 0 {
          write!(f, ", {} failed", failed)?;
        }
        Ok(())
      }
      Self::AlreadyRunning => write!(f, "Sync already in progress"),
    }
  }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
  if n == 1 {
    one
  } else {
    many
  }
}

/// Sequences the monitor and the queue. Owns no persisted data.
pub struct SyncOrchestrator<N: Network> {
  queue: Arc<MutationQueue>,
  network: N,
  base_url: Url,
  /// Held for the duration of a replay pass
  in_flight: Mutex<()>,
}

impl<N: Network> SyncOrchestrator<N> {
  pub fn new(queue: Arc<MutationQueue>, network: N, base_url: Url) -> Self {
    Self {
      queue,
      network,
      base_url,
      in_flight: Mutex::new(()),
    }
  }

  /// Run one replay pass, waiting for any pass already in flight to finish first.
  pub async fn sync_offline_queue(&self) -> SyncResult {
    let _guard = self.in_flight.lock().await;
    self.replay().await
  }

  /// Run one replay pass unless one is already in flight.
  pub async fn try_sync(&self) -> Option<SyncResult> {
    let _guard = self.in_flight.try_lock().ok()?;
    Some(self.replay().await)
  }

  async fn replay(&self) -> SyncResult {
    self
      .queue
      .drain_and_replay(
        &self.base_url,
        &self.network,
        |request| debug!("synced {} {}", request.method, request.endpoint),
        |request, e| {
          warn!(
            "sync of {} {} failed: {}",
            request.method, request.endpoint, e
          )
        },
      )
      .await
  }

  /// React to one connectivity notification.
  pub async fn handle_state(&self, state: ConnectivityState) -> Option<SyncNotice> {
    if !state.is_online {
      let pending = self.queue.size().unwrap_or_else(|e| {
        warn!("could not read offline queue size: {}", e);
        0
      });
      return Some(SyncNotice::Offline { pending });
    }

    if !state.just_reconnected {
      return None;
    }

    match self.try_sync().await {
      Some(result) => Some(SyncNotice::Synced(result)),
      None => {
        debug!("reconnect ignored, replay already in flight");
        Some(SyncNotice::AlreadyRunning)
      }
    }
  }

  /// Follow connectivity changes until the monitor goes away, sending a notice
  /// for each transition.
  pub async fn run(
    self: Arc<Self>,
    mut connectivity: watch::Receiver<ConnectivityState>,
    notices: mpsc::UnboundedSender<SyncNotice>,
  ) {
    while connectivity.changed().await.is_ok() {
      let state = *connectivity.borrow_and_update();

      if let Some(notice) = self.handle_state(state).await {
        info!("{}", notice);
        if notices.send(notice).is_err() {
          break;
        }
      }
    }
  }
}
