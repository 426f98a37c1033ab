//! Custom error types for the driver.
//!
//! This module defines the primary error type, [`Error`], for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failures a GRBL session can produce, from
//! serial I/O problems to protocol-level faults reported by the controller.
//!
//! Two conditions are deliberately *not* errors:
//!
//! - An out-of-bounds motion target is a rejection, reported by the motion
//!   methods as `Ok(None)` so the caller can adjust and retry.
//! - A missing or unparseable location file degrades to an empty table at
//!   load time and never fails construction.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the driver.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid settings detected at construction or load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serial port enumeration or open failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Location file parse failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The controller answered a command with `error:*` or `ALARM:*`.
    /// The remainder of the batch is never dispatched.
    #[error("{reply} (for: {line})")]
    Protocol {
        /// The command line the controller rejected.
        line: String,
        /// The raw terminal reply.
        reply: String,
    },

    /// No terminal reply arrived within the acknowledgment window.
    #[error("no acknowledgment for '{line}' within {waited:?}")]
    AckTimeout {
        /// The command line still awaiting acknowledgment.
        line: String,
        /// How long the driver waited.
        waited: Duration,
    },

    /// The machine never reported `Idle` within the allotted window.
    #[error("machine did not become Idle within {waited:?}, last status: {last_status}")]
    IdleTimeout {
        /// How long the driver polled.
        waited: Duration,
        /// Last non-empty status text observed, for diagnosis.
        last_status: String,
    },

    /// A status reply that does not match the `<STATE|MPos:...>` frame.
    #[error("malformed status frame: {0:?}")]
    MalformedStatus(String),

    /// Name absent from the location table.
    #[error("unknown location '{0}'")]
    UnknownLocation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = Error::Protocol {
            line: "G0 X5".to_string(),
            reply: "error:9".to_string(),
        };
        assert_eq!(err.to_string(), "error:9 (for: G0 X5)");
    }

    #[test]
    fn test_idle_timeout_carries_last_status() {
        let err = Error::IdleTimeout {
            waited: Duration::from_secs(60),
            last_status: "<Run|MPos:1.000,2.000,3.000|FS:500,0>".to_string(),
        };
        assert!(err.to_string().contains("<Run|MPos:1.000,2.000,3.000"));
    }
}
