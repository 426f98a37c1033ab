//! GRBL status frames and command replies.
//!
//! Reference: GRBL v1.1 interface documentation.
//!
//! Protocol overview:
//! - Commands are ASCII lines terminated by `\n`; each is acknowledged by a
//!   terminal reply starting with `ok`, `error:`, or `ALARM:`.
//! - The realtime status request is the single byte `?`; the controller
//!   answers with one frame `<STATE|MPos:x,y,z|FS:feed,spindle>` where the
//!   positions are fixed 3-decimal floats. Later firmware appends extra
//!   `|`-separated fields (`WCO:`, `Ov:`, ...) which this parser tolerates
//!   and ignores.

use crate::error::{Error, Result};
use std::fmt;

/// Reported machine state tag, the first field of a status frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    /// No motion in progress; safe to dispatch the next operation.
    Idle,
    /// Motion (or another cycle) in progress.
    Run,
    /// Controller is locked out and requires an unlock/homing cycle.
    Alarm,
    /// Any other tag the controller reports (`Hold`, `Jog`, `Home`, ...).
    Other(String),
}

impl MachineState {
    /// Maps a bare state word to its tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Idle" => MachineState::Idle,
            "Run" => MachineState::Run,
            "Alarm" => MachineState::Alarm,
            other => MachineState::Other(other.to_string()),
        }
    }

    /// Whether this state means the machine has finished moving.
    pub fn is_idle(&self) -> bool {
        matches!(self, MachineState::Idle)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => write!(f, "Idle"),
            MachineState::Run => write!(f, "Run"),
            MachineState::Alarm => write!(f, "Alarm"),
            MachineState::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// One parsed status frame. Produced fresh by every status query and never
/// cached; the raw frame text is kept for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineStatus {
    /// Reported state tag.
    pub state: MachineState,
    /// Machine position `[x, y, z]`.
    pub mpos: [f64; 3],
    /// The frame exactly as received.
    pub raw: String,
}

impl MachineStatus {
    /// Parses a `<STATE|MPos:x,y,z|...>` frame.
    ///
    /// # Errors
    /// Returns [`Error::MalformedStatus`] when the angle brackets, the
    /// state tag, or the three `MPos` coordinates are missing.
    pub fn parse(frame: &str) -> Result<Self> {
        let trimmed = frame.trim();
        let inner = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(|| Error::MalformedStatus(frame.to_string()))?;

        let mut fields = inner.split('|');
        let tag = fields
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::MalformedStatus(frame.to_string()))?;
        let state = MachineState::from_tag(tag);

        let mut mpos = None;
        for field in fields {
            if let Some(coords) = field.strip_prefix("MPos:") {
                mpos = Some(parse_coords(coords, frame)?);
            }
        }
        let mpos = mpos.ok_or_else(|| Error::MalformedStatus(frame.to_string()))?;

        Ok(Self {
            state,
            mpos,
            raw: trimmed.to_string(),
        })
    }
}

fn parse_coords(coords: &str, frame: &str) -> Result<[f64; 3]> {
    let mut out = [0.0; 3];
    let mut parts = coords.split(',');
    for slot in &mut out {
        let part = parts
            .next()
            .ok_or_else(|| Error::MalformedStatus(frame.to_string()))?;
        *slot = part
            .trim()
            .parse()
            .map_err(|_| Error::MalformedStatus(frame.to_string()))?;
    }
    Ok(out)
}

/// Classification of one reply line read while awaiting acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `ok*`: the command was accepted; move to the next line.
    Ok,
    /// `error:*` or `ALARM:*`: terminal failure; abort the batch.
    Fault,
    /// Anything else (startup banner, feedback messages); read and discard.
    Info,
}

impl ReplyKind {
    /// Classifies a trimmed reply line by its terminal prefix.
    pub fn classify(reply: &str) -> Self {
        if reply.starts_with("ok") {
            ReplyKind::Ok
        } else if reply.starts_with("error:") || reply.starts_with("ALARM:") {
            ReplyKind::Fault
        } else {
            ReplyKind::Info
        }
    }
}
