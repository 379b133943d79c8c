//! Worker lifecycle states and the page-side reload guard.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Interceptor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Created, nothing installed yet
  #[default]
  Parsed,
  /// Pre-caching the static manifest
  Installing,
  /// Installed, waiting to take over from the previous generation
  Waiting,
  /// Deleting partitions of other generations
  Activating,
  /// Intercepting requests
  Activated,
  /// Install failed or replaced
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    }
  }
}

/// Check if a state transition is allowed.
pub fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (Parsed, Installing)
      | (Parsed, Activated) // restart of an already active generation
      | (Installing, Waiting)
      | (Installing, Redundant)
      | (Waiting, Activating)
      | (Waiting, Redundant)
      | (Activating, Activated)
      | (Activating, Redundant)
      | (Activated, Redundant)
  )
}

/// Apply a transition, rejecting invalid ones.
pub fn transition(state: &mut WorkerState, to: WorkerState) -> Result<()> {
  if !is_valid_transition(*state, to) {
    return Err(eyre!(
      "Invalid worker state transition: {} -> {}",
      state.as_str(),
      to.as_str()
    ));
  }

  tracing::debug!("worker state {} -> {}", state.as_str(), to.as_str());
  *state = to;
  Ok(())
}

/// Page-side guard so a controller change triggers exactly one reload.
///
/// Several tabs can each observe the change; only the first notification wins.
#[derive(Debug, Default)]
pub struct ReloadGuard {
  reloading: AtomicBool,
}

impl ReloadGuard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns `true` if the caller should reload now.
  pub fn on_controller_change(&self) -> bool {
    !self.reloading.swap(true, Ordering::SeqCst)
  }

  pub fn has_reloaded(&self) -> bool {
    self.reloading.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path_transitions() {
    let mut state = WorkerState::default();
    for next in [
      WorkerState::Installing,
      WorkerState::Waiting,
      WorkerState::Activating,
      WorkerState::Activated,
    ] {
      transition(&mut state, next).unwrap();
    }
    assert_eq!(state, WorkerState::Activated);
  }

  #[test]
  fn test_cannot_activate_without_install() {
    let mut state = WorkerState::Parsed;
    assert!(transition(&mut state, WorkerState::Activating).is_err());
    assert_eq!(state, WorkerState::Parsed);
  }

  #[test]
  fn test_redundant_is_terminal() {
    assert!(!is_valid_transition(
      WorkerState::Redundant,
      WorkerState::Installing
    ));
    assert!(!is_valid_transition(
      WorkerState::Redundant,
      WorkerState::Activated
    ));
  }

  #[test]
  fn test_reload_guard_fires_once() {
    let guard = ReloadGuard::new();
    assert!(!guard.has_reloaded());

    assert!(guard.on_controller_change());
    assert!(!guard.on_controller_change());
    assert!(!guard.on_controller_change());
    assert!(guard.has_reloaded());
  }
}
