//! Connectivity state machine shared by the worker's components.

/// Network reachability as last reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Online,
  Offline,
}

/// A state change produced by a connectivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// Offline → online; triggers exactly one flush pass.
  CameOnline,
  WentOffline,
}

/// Tracks reachability across host signals.
///
/// The initial state comes from a live probe at construction, not an
/// assumption. Signals repeating the current state are no-ops, so duplicate
/// platform events collapse naturally.
#[derive(Debug)]
pub struct Connectivity {
  state: State,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    Self {
      state: if online { State::Online } else { State::Offline },
    }
  }

  pub fn is_online(&self) -> bool {
    self.state == State::Online
  }

  /// Apply a platform signal; returns the transition, if any occurred.
  pub fn signal(&mut self, online: bool) -> Option<Transition> {
    match (self.state, online) {
      (State::Offline, true) => {
        self.state = State::Online;
        Some(Transition::CameOnline)
      }
      (State::Online, false) => {
        self.state = State::Offline;
        Some(Transition::WentOffline)
      }
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_initial_state_is_injected() {
    assert!(Connectivity::new(true).is_online());
    assert!(!Connectivity::new(false).is_online());
  }

  #[test]
  fn test_transitions() {
    let mut connectivity = Connectivity::new(false);

    assert_eq!(connectivity.signal(true), Some(Transition::CameOnline));
    assert!(connectivity.is_online());

    assert_eq!(connectivity.signal(false), Some(Transition::WentOffline));
    assert!(!connectivity.is_online());
  }

  #[test]
  fn test_duplicate_signals_are_noops() {
    let mut connectivity = Connectivity::new(true);

    assert_eq!(connectivity.signal(true), None);
    assert!(connectivity.is_online());

    connectivity.signal(false);
    assert_eq!(connectivity.signal(false), None);
    assert!(!connectivity.is_online());
  }
}
