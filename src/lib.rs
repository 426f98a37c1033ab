//! Synchronous driver for GRBL-class CNC motion controllers.
//!
//! This crate speaks GRBL's line-oriented protocol over a serial link:
//! commands acknowledged by `ok`/`error:`/`ALARM:` replies, `?` status
//! polling for idle detection, and bounds-checked coordinate-to-G-code
//! translation so the machine never receives an out-of-bounds move. A
//! virtual mode substitutes an in-memory simulated controller for the
//! transport, letting every layer above the link run without hardware.
//!
//! The public surface is [`GrblMachine`], configured by [`Settings`]:
//!
//! ```
//! use grbl_driver::{GrblMachine, MoveKind, Settings, DEFAULT_FEED};
//!
//! # fn main() -> grbl_driver::Result<()> {
//! let mut machine = GrblMachine::new(Settings::simulated())?;
//! let acks = machine.move_to_point_safe(50.0, 75.0, -2.0, DEFAULT_FEED, MoveKind::Linear)?;
//! assert!(acks.is_some());
//! let status = machine.query_status()?;
//! assert_eq!(status.mpos, [50.0, 75.0, -2.0]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gcode;
pub mod link;
pub mod locations;
pub mod machine;
pub mod sim;
pub mod status;

pub use config::{AxisBounds, Settings, TimeoutSettings, WorkspaceBounds, DEFAULT_BAUD_RATE};
pub use error::{Error, Result};
pub use gcode::{build_move, MoveKind, Target, DEFAULT_FEED};
pub use link::Link;
pub use locations::{LocationEntry, LocationTable};
pub use machine::{GrblMachine, HomeOptions, DEFAULT_IDLE_WAIT, DEFAULT_POLL_HZ};
pub use sim::VirtualMachine;
pub use status::{MachineState, MachineStatus, ReplyKind};
