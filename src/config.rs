//! Driver settings: serial parameters, workspace bounds, and timeouts.
//!
//! [`Settings`] can be built programmatically or deserialized from a YAML
//! file via [`Settings::from_path`]. Every field beyond the port carries a
//! default, so a minimal file is just `port: /dev/ttyUSB0`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default GRBL baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Inclusive travel range for a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AxisBounds {
    /// Lowest commandable coordinate.
    pub low: f64,
    /// Highest commandable coordinate.
    pub high: f64,
}

impl AxisBounds {
    /// Creates a range, rejecting `low > high`.
    pub fn new(low: f64, high: f64) -> Result<Self> {
        let bounds = Self { low, high };
        bounds.validate("axis")?;
        Ok(bounds)
    }

    fn validate(&self, axis: &str) -> Result<()> {
        if self.low > self.high {
            return Err(Error::Config(format!(
                "{} bounds inverted: low {} > high {}",
                axis, self.low, self.high
            )));
        }
        Ok(())
    }

    /// Whether `value` is acceptable for this axis. An absent value passes:
    /// it means the axis is not being commanded.
    pub fn contains(&self, value: Option<f64>) -> bool {
        match value {
            None => true,
            Some(v) => self.low <= v && v <= self.high,
        }
    }
}

/// Workspace travel limits per axis. Immutable once the driver is built;
/// every motion target is gated against these before any G-code is sent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkspaceBounds {
    /// X travel range.
    pub x: AxisBounds,
    /// Y travel range.
    pub y: AxisBounds,
    /// Z travel range.
    pub z: AxisBounds,
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x: AxisBounds { low: 0.0, high: 270.0 },
            y: AxisBounds { low: 0.0, high: 150.0 },
            z: AxisBounds { low: -35.0, high: 0.0 },
        }
    }
}

impl WorkspaceBounds {
    /// Checks the per-axis `low <= high` invariant. Deserialized values
    /// bypass [`AxisBounds::new`], so the driver re-validates here.
    pub fn validate(&self) -> Result<()> {
        self.x.validate("X")?;
        self.y.validate("Y")?;
        self.z.validate("Z")?;
        Ok(())
    }
}

/// Blocking-I/O timeout table, in milliseconds so it deserializes plainly.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Per-read wait for a command reply.
    pub command_reply_ms: u64,
    /// Per-read wait for a status reply. Shorter than `command_reply_ms`
    /// so status polling never stalls the idle-wait loop.
    pub status_reply_ms: u64,
    /// Overall ceiling on waiting for one command's acknowledgment. Bounds
    /// the reply-read loop so a silent link cannot hang the driver.
    pub ack_window_ms: u64,
    /// Settle time after the wake sequence, letting the controller finish
    /// its boot banner before it is discarded.
    pub wake_settle_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_reply_ms: 2_000,
            status_reply_ms: 500,
            ack_window_ms: 30_000,
            wake_settle_ms: 2_000,
        }
    }
}

impl TimeoutSettings {
    /// Per-read command reply timeout.
    pub fn command_reply(&self) -> Duration {
        Duration::from_millis(self.command_reply_ms)
    }

    /// Per-read status reply timeout.
    pub fn status_reply(&self) -> Duration {
        Duration::from_millis(self.status_reply_ms)
    }

    /// Overall acknowledgment window per command line.
    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    /// Post-wake settle duration.
    pub fn wake_settle(&self) -> Duration {
        Duration::from_millis(self.wake_settle_ms)
    }
}

/// Full driver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Serial baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Workspace travel limits.
    #[serde(default)]
    pub bounds: WorkspaceBounds,
    /// Blocking-I/O timeouts.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// When set, no hardware is touched: commands are recorded against a
    /// simulated controller instead.
    #[serde(default)]
    pub virtual_mode: bool,
    /// Optional YAML file of named locations. Missing or malformed files
    /// degrade to an empty table rather than failing construction.
    #[serde(default)]
    pub locations_file: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Settings {
    /// Settings for a real controller on `port`, with default bounds and
    /// timeouts.
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            bounds: WorkspaceBounds::default(),
            timeouts: TimeoutSettings::default(),
            virtual_mode: false,
            locations_file: None,
        }
    }

    /// Settings for a simulated controller that never opens hardware.
    pub fn simulated() -> Self {
        let mut settings = Self::new("virtual");
        settings.virtual_mode = true;
        settings
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed; unlike the
    /// location table, the driver cannot run without a port to talk to.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&text)?;
        settings.bounds.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_bounds_reject_inverted_range() {
        assert!(AxisBounds::new(10.0, -10.0).is_err());
        assert!(AxisBounds::new(-10.0, 10.0).is_ok());
        assert!(AxisBounds::new(5.0, 5.0).is_ok());
    }

    #[test]
    fn test_axis_contains_absent_value() {
        let bounds = AxisBounds { low: 0.0, high: 100.0 };
        assert!(bounds.contains(None));
        assert!(bounds.contains(Some(0.0)));
        assert!(bounds.contains(Some(100.0)));
        assert!(!bounds.contains(Some(-0.001)));
        assert!(!bounds.contains(Some(100.001)));
    }

    #[test]
    fn test_default_workspace_matches_machine_envelope() {
        let bounds = WorkspaceBounds::default();
        assert_eq!(bounds.x.high, 270.0);
        assert_eq!(bounds.y.high, 150.0);
        assert_eq!(bounds.z.low, -35.0);
        assert_eq!(bounds.z.high, 0.0);
        assert!(bounds.validate().is_ok());
    }

    #[test]
    fn test_settings_from_yaml_with_defaults() {
        let yaml = "port: /dev/ttyACM0\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.port, "/dev/ttyACM0");
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert!(!settings.virtual_mode);
        assert_eq!(settings.timeouts, TimeoutSettings::default());
    }

    #[test]
    fn test_settings_from_yaml_overrides() {
        let yaml = r#"
port: COM3
baud_rate: 250000
virtual_mode: true
bounds:
  z: { low: -50.0, high: 5.0 }
timeouts:
  status_reply_ms: 250
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.baud_rate, 250_000);
        assert!(settings.virtual_mode);
        assert_eq!(settings.bounds.z.low, -50.0);
        assert_eq!(settings.bounds.x.high, 270.0);
        assert_eq!(settings.timeouts.status_reply_ms, 250);
        assert_eq!(settings.timeouts.command_reply_ms, 2_000);
    }
}
