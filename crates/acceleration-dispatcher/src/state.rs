//! Lifecycle state of the dispatcher

use std::fmt;
use serde::{Serialize, Deserialize};

/// Represents the current state of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatcherState {
    /// Capabilities not yet applied; work runs on the baseline path
    Uninitialized,

    /// Backends are selectable
    Ready,

    /// Handles released; every call fails
    Disposed,
}

impl DispatcherState {
    /// Creates the initial state
    pub fn new() -> Self {
        DispatcherState::Uninitialized
    }

    /// Returns true if backends can be used
    pub fn is_ready(&self) -> bool {
        matches!(self, DispatcherState::Ready)
    }

    /// Returns true once disposed
    pub fn is_disposed(&self) -> bool {
        matches!(self, DispatcherState::Disposed)
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Uninitialized => write!(f, "Uninitialized"),
            DispatcherState::Ready => write!(f, "Ready"),
            DispatcherState::Disposed => write!(f, "Disposed"),
        }
    }
}

impl Default for DispatcherState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_methods() {
        let initial = DispatcherState::default();
        assert_eq!(initial, DispatcherState::Uninitialized);
        assert!(!initial.is_ready());
        assert!(!initial.is_disposed());

        assert!(DispatcherState::Ready.is_ready());
        assert!(DispatcherState::Disposed.is_disposed());
    }

    #[test]
    fn test_display() {
        assert_eq!(DispatcherState::Uninitialized.to_string(), "Uninitialized");
        assert_eq!(DispatcherState::Ready.to_string(), "Ready");
        assert_eq!(DispatcherState::Disposed.to_string(), "Disposed");
    }
}
