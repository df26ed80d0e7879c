//! Signals raised by activities and delivered to their ancestors

use serde::{Deserialize, Serialize};

/// A message raised by an activity instance and propagated to every ancestor
///
/// Signals are transient. They are never persisted, and the only state an
/// ancestor may change while observing one is its own properties, or its
/// own subtree when it acts as a cancellation scope.
///
/// # Example
///
/// ```
/// use arbor_engine::workflow::Signal;
///
/// let signal = Signal::break_loop();
/// assert!(signal.is_break());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    /// Signal type identifier
    pub signal_type: String,

    /// Signal payload (JSON)
    pub payload: serde_json::Value,
}

impl Signal {
    /// Create a new signal
    pub fn new(signal_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            signal_type: signal_type.into(),
            payload,
        }
    }

    /// Create a break signal, observed by enclosing loops
    pub fn break_loop() -> Self {
        Self::new(signal_types::BREAK, serde_json::json!({}))
    }

    /// Create a cancellation signal, observed by the nearest
    /// [`CancelBehavior`](crate::activity::CancelBehavior)
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::new(
            signal_types::CANCEL,
            serde_json::json!({ "reason": reason.into() }),
        )
    }

    /// Create the fault signal raised when an activity instance faults
    pub fn fault(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::new(
            signal_types::FAULT,
            serde_json::json!({ "message": message.into(), "node_id": node_id.into() }),
        )
    }

    /// Create a custom signal
    pub fn custom(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(name, payload)
    }

    pub fn is_break(&self) -> bool {
        self.signal_type == signal_types::BREAK
    }

    pub fn is_cancel(&self) -> bool {
        self.signal_type == signal_types::CANCEL
    }

    pub fn is_fault(&self) -> bool {
        self.signal_type == signal_types::FAULT
    }
}

/// Common signal type constants
pub mod signal_types {
    /// Ask the nearest enclosing loop to stop iterating
    pub const BREAK: &str = "break";

    /// Ask ancestors to stop the work they are driving
    pub const CANCEL: &str = "cancel";

    /// An activity instance faulted; handling it keeps the run alive
    pub const FAULT: &str = "fault";
}
