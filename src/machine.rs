//! The GRBL driver: command/acknowledgment session, idle polling, and
//! bounds-checked motion.
//!
//! [`GrblMachine`] layers three concerns over the [`Link`]:
//!
//! - a protocol session that sends one line at a time and blocks for its
//!   terminal reply (`ok`, `error:*`, `ALARM:*`);
//! - an idle waiter that polls `?` status until the machine reports `Idle`;
//! - a motion planner that gates every target against the workspace bounds
//!   and synthesizes G-code (direct moves, Z-safe sequences, homing).
//!
//! Every operation takes `&mut self`: the connection is a single
//! exclusively-owned resource and overlapping use from multiple threads is
//! a compile error rather than a convention.
//!
//! # Example
//!
//! ```no_run
//! use grbl_driver::{GrblMachine, HomeOptions, MoveKind, Settings, DEFAULT_FEED};
//!
//! fn main() -> grbl_driver::Result<()> {
//!     let mut machine = GrblMachine::new(Settings::new("/dev/ttyUSB0"))?;
//!     machine.connect()?;
//!     machine.home(HomeOptions::default())?;
//!     let acks = machine.move_to_point_safe(50.0, 75.0, -2.0, DEFAULT_FEED, MoveKind::Linear)?;
//!     assert!(acks.is_some());
//!     machine.wait_until_idle(10.0, std::time::Duration::from_secs(60))?;
//!     machine.close();
//!     Ok(())
//! }
//! ```

use crate::config::{Settings, TimeoutSettings, WorkspaceBounds};
use crate::error::{Error, Result};
use crate::gcode::{build_move, MoveKind, Target, DEFAULT_FEED};
use crate::link::Link;
use crate::locations::LocationTable;
use crate::status::{MachineStatus, ReplyKind};
use log::{debug, error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Default idle-poll frequency in Hz.
pub const DEFAULT_POLL_HZ: f64 = 10.0;

/// Default ceiling on waiting for the machine to report `Idle`.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(60);

/// Mode-reset sequence: millimeters, absolute positioning, feed-per-minute,
/// default work coordinate system.
const SAFE_MODE_LINES: [&str; 4] = ["G21", "G90", "G94", "G54"];

/// Options for the homing sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomeOptions {
    /// Send `$X` first to clear an alarm lock.
    pub unlock: bool,
    /// Zero the work coordinate system at the homed position
    /// (`G10 L20 P1 X0 Y0 Z0`).
    pub set_work_zero: bool,
    /// Park position to travel to after homing, via the Z-safe pattern.
    /// `None` skips the park moves entirely.
    pub park: Option<(f64, f64, f64)>,
    /// Use rapid (`G0`) rather than linear (`G1`) park moves.
    pub rapid: bool,
}

impl Default for HomeOptions {
    fn default() -> Self {
        Self {
            unlock: true,
            set_work_zero: true,
            park: Some((0.0, 0.0, 0.0)),
            rapid: true,
        }
    }
}

/// Driver for a GRBL-class motion controller.
pub struct GrblMachine {
    link: Link,
    bounds: WorkspaceBounds,
    timeouts: TimeoutSettings,
    locations: LocationTable,
}

impl GrblMachine {
    /// Builds a driver from settings. The location table is loaded here
    /// (degrading to empty on failure); the port is not opened until
    /// [`GrblMachine::connect`] or the first operation that needs it.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the workspace bounds are inverted.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.bounds.validate()?;
        let locations = LocationTable::load(settings.locations_file.as_deref());
        let link = if settings.virtual_mode {
            Link::simulated(settings.timeouts)
        } else {
            Link::serial(&settings.port, settings.baud_rate, settings.timeouts)
        };
        info!(
            "GRBL driver initialized (virtual={}, port={}, baud={})",
            settings.virtual_mode, settings.port, settings.baud_rate
        );
        Ok(Self {
            link,
            bounds: settings.bounds,
            timeouts: settings.timeouts,
            locations,
        })
    }

    /// Opens the connection (no-op if already open or virtual).
    pub fn connect(&mut self) -> Result<()> {
        self.link.connect()
    }

    /// Closes the connection. Idempotent and safe after any failure.
    pub fn close(&mut self) {
        self.link.close()
    }

    /// The underlying link, e.g. to inspect the virtual command log.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// The configured workspace bounds.
    pub fn bounds(&self) -> &WorkspaceBounds {
        &self.bounds
    }

    /// The named-location table.
    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    // ------------------------------------------------------------------
    // Protocol session
    // ------------------------------------------------------------------

    /// Sends command lines one at a time, blocking for each terminal reply.
    ///
    /// Blank (whitespace-only) lines are skipped and produce no command.
    /// Returns the `ok` replies in dispatch order: either every line in
    /// the batch is acknowledged, or the call fails at the first
    /// `error:`/`ALARM:` reply with no further lines sent.
    ///
    /// In virtual mode nothing blocks and nothing fails: each non-blank
    /// line is applied to the simulator and acknowledged synthetically.
    ///
    /// # Errors
    /// [`Error::Protocol`] on an `error:`/`ALARM:` reply,
    /// [`Error::AckTimeout`] when no terminal reply arrives within the
    /// configured acknowledgment window.
    pub fn send_lines<I, S>(&mut self, lines: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replies = Vec::new();

        if self.link.is_virtual() {
            for raw in lines {
                let line = raw.as_ref().trim();
                if line.is_empty() {
                    continue;
                }
                debug!("[virtual] >> {}", line);
                if let Some(sim) = self.link.simulator_mut() {
                    sim.apply_line(line);
                }
                replies.push("ok".to_string());
            }
            if let Some(sim) = self.link.simulator_mut() {
                sim.finish_batch();
            }
            info!("[virtual] sent {} lines", replies.len());
            return Ok(replies);
        }

        self.link.ensure_connected()?;
        for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            debug!(">> {}", line);
            self.link.write_line(line)?;
            replies.push(self.await_ack(line)?);
        }
        info!("sent {} lines", replies.len());
        Ok(replies)
    }

    /// Reads replies until a terminal one arrives for `line`.
    fn await_ack(&mut self, line: &str) -> Result<String> {
        let link = &mut self.link;
        let reply_timeout = self.timeouts.command_reply();
        pump_replies(line, self.timeouts.ack_window(), || {
            link.read_line(reply_timeout)
        })
    }

    /// Queries status and returns the raw frame text (`""` on timeout).
    pub fn query_status_raw(&mut self) -> Result<String> {
        if let Some(sim) = self.link.simulator() {
            let frame = sim.status_frame();
            debug!("[virtual] ? => {}", frame);
            return Ok(frame);
        }
        self.link.ensure_connected()?;
        debug!(">> ?");
        self.link.write_raw(b"?")?;
        self.link.read_line(self.timeouts.status_reply())
    }

    /// Queries and parses the machine status.
    ///
    /// # Errors
    /// [`Error::MalformedStatus`] when the reply is empty (timeout) or not
    /// a status frame.
    pub fn query_status(&mut self) -> Result<MachineStatus> {
        let raw = self.query_status_raw()?;
        MachineStatus::parse(&raw)
    }

    // ------------------------------------------------------------------
    // Idle waiter
    // ------------------------------------------------------------------

    /// Polls status at `poll_hz` until the machine reports `Idle`.
    ///
    /// In virtual mode simulated motion is instantaneous and this returns
    /// immediately.
    ///
    /// # Errors
    /// [`Error::Config`] for a non-positive poll rate;
    /// [`Error::IdleTimeout`] (carrying the last observed status text)
    /// once `max_wait` elapses without an `Idle` report.
    pub fn wait_until_idle(&mut self, poll_hz: f64, max_wait: Duration) -> Result<()> {
        if poll_hz <= 0.0 {
            return Err(Error::Config(format!(
                "poll rate must be positive: {}",
                poll_hz
            )));
        }
        if self.link.is_virtual() {
            debug!("[virtual] wait_until_idle: immediately Idle");
            return Ok(());
        }

        let period = Duration::from_secs_f64(1.0 / poll_hz);
        let start = Instant::now();
        let mut last = String::new();
        loop {
            let status = self.query_status_raw()?;
            if !status.is_empty() {
                last = status.clone();
            }
            if status.starts_with("<Idle") {
                return Ok(());
            }
            if start.elapsed() > max_wait {
                return Err(Error::IdleTimeout {
                    waited: start.elapsed(),
                    last_status: last,
                });
            }
            thread::sleep(period);
        }
    }

    // ------------------------------------------------------------------
    // Motion planner
    // ------------------------------------------------------------------

    /// Whether every commanded axis of `target` lies within the workspace.
    /// Absent axes pass. Failing targets are never dispatched.
    pub fn within_bounds(&self, target: &Target) -> bool {
        let inside = self.bounds.x.contains(target.x)
            && self.bounds.y.contains(target.y)
            && self.bounds.z.contains(target.z);
        if !inside {
            debug!(
                "bounds check failed: {} against X[{}..{}] Y[{}..{}] Z[{}..{}]",
                target,
                self.bounds.x.low,
                self.bounds.x.high,
                self.bounds.y.low,
                self.bounds.y.high,
                self.bounds.z.low,
                self.bounds.z.high,
            );
        }
        inside
    }

    /// Dispatches a single move to `target` and waits for acknowledgment
    /// (not for motion to finish).
    ///
    /// Returns `Ok(None)` (a rejection, not an error) when the target
    /// fails the bounds check, leaving the caller free to adjust and
    /// retry; otherwise the `ok` replies for the dispatched line.
    pub fn move_to_point(
        &mut self,
        target: Target,
        feed: u32,
        kind: MoveKind,
    ) -> Result<Option<Vec<String>>> {
        if !self.within_bounds(&target) {
            warn!("out of bounds: {}", target);
            return Ok(None);
        }
        info!("move to point: {} @ F{} ({})", target, feed, kind);
        let line = build_move(&target, feed, kind);
        let acks = self.send_lines([line])?;
        Ok(Some(acks))
    }

    /// Z-safe move: retract to the Z travel limit in machine coordinates,
    /// travel in X/Y, then plunge to the target Z. The ordering keeps a
    /// diagonal approach from dragging the tool through material.
    ///
    /// The whole target is bounds-checked before any line is built;
    /// returns `Ok(None)` on rejection.
    pub fn move_to_point_safe(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        feed: u32,
        kind: MoveKind,
    ) -> Result<Option<Vec<String>>> {
        let target = Target::xyz(x, y, z);
        if !self.within_bounds(&target) {
            warn!("out of bounds (safe move): {}", target);
            return Ok(None);
        }
        info!("safe move to: {} @ F{}", target, feed);
        let lines = [
            format!("G53 G0 Z{}", self.bounds.z.high),
            "G90".to_string(),
            format!("{} X{:.3} Y{:.3} F{}", kind.word(), x, y, feed),
            format!("{} Z{:.3}", kind.word(), z),
        ];
        let acks = self.send_lines(lines)?;
        Ok(Some(acks))
    }

    /// Feeds through a sequence of points as one batch under absolute
    /// positioning. Out-of-bounds points are skipped with a warning; the
    /// rest are dispatched.
    pub fn move_through_points(
        &mut self,
        points: &[(f64, f64, f64)],
        feed: u32,
    ) -> Result<Vec<String>> {
        info!("moving through {} points at F{}", points.len(), feed);
        let mut lines = vec!["G90".to_string()];
        for &(x, y, z) in points {
            let target = Target::xyz(x, y, z);
            if self.within_bounds(&target) {
                lines.push(build_move(&target, feed, MoveKind::Linear));
            } else {
                warn!("skipped out-of-bounds point: {}", target);
            }
        }
        self.send_lines(lines)
    }

    /// Runs the homing sequence: optional `$X` unlock, `$H`, the mode
    /// resets, optional work-zero, optional Z-safe park. Dispatched as one
    /// batch; waits for acknowledgment, not for idle.
    pub fn home(&mut self, opts: HomeOptions) -> Result<Vec<String>> {
        let mut lines: Vec<String> = Vec::new();
        if opts.unlock {
            lines.push("$X".to_string());
        }
        lines.push("$H".to_string());
        lines.extend(SAFE_MODE_LINES.iter().map(|s| s.to_string()));
        if opts.set_work_zero {
            lines.push("G10 L20 P1 X0 Y0 Z0".to_string());
        }
        if let Some((x, y, z)) = opts.park {
            let word = if opts.rapid { "G0" } else { "G1" };
            lines.push(format!("G53 G0 Z{}", self.bounds.z.high));
            lines.push(format!("{} X{:.3} Y{:.3}", word, x, y));
            lines.push(format!("{} Z{:.3}", word, z));
        }
        info!("starting homing sequence");
        debug!("homing program: {:?}", lines);
        self.send_lines(lines)
    }

    /// Z-safe rapid move back to the work origin (0, 0, 0).
    pub fn origin(&mut self) -> Result<Option<Vec<String>>> {
        info!("returning to work origin (0,0,0)");
        self.move_to_point_safe(0.0, 0.0, 0.0, DEFAULT_FEED, MoveKind::Rapid)
    }

    /// Dispatches the mode-reset sequence (G21, G90, G94, G54).
    pub fn set_safe_modes(&mut self) -> Result<Vec<String>> {
        info!("setting safe modes (G21, G90, G94, G54)");
        self.send_lines(SAFE_MODE_LINES)
    }

    /// Dispatches a multi-line G-code program as one batch, then
    /// optionally waits for the machine to report `Idle` (with the default
    /// poll rate and ceiling).
    ///
    /// An empty program is reported with a warning and performs no I/O.
    pub fn run_program(&mut self, gcode: &str, wait: bool) -> Result<Vec<String>> {
        let lines: Vec<&str> = gcode.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            warn!("empty G-code program");
            return Ok(Vec::new());
        }
        debug!("dispatching {} lines", lines.len());
        let acks = self.send_lines(lines)?;
        if wait {
            self.wait_until_idle(DEFAULT_POLL_HZ, DEFAULT_IDLE_WAIT)?;
        }
        Ok(acks)
    }

    /// Resolves a named location (and optional grid slot) and moves there,
    /// Z-safe by default.
    ///
    /// # Errors
    /// [`Error::UnknownLocation`] when the name is not in the table.
    pub fn move_to_location(
        &mut self,
        name: &str,
        index: Option<usize>,
        safe: bool,
        feed: u32,
    ) -> Result<Option<Vec<String>>> {
        info!(
            "moving to location '{}' index {:?} (safe={})",
            name, index, safe
        );
        let (x, y, z) = self.locations.resolve(name, index)?;
        if safe {
            self.move_to_point_safe(x, y, z, feed, MoveKind::Linear)
        } else {
            self.move_to_point(Target::xyz(x, y, z), feed, MoveKind::Linear)
        }
    }
}

/// Drains replies from `read` until a terminal one arrives for `line`.
///
/// Informational frames are discarded; empty reads (per-read timeout)
/// retry until the overall acknowledgment `window` closes. The window is a
/// hardening over the controller's documented behavior: a silent link
/// fails loudly instead of hanging.
fn pump_replies<F>(line: &str, window: Duration, mut read: F) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let start = Instant::now();
    loop {
        if start.elapsed() > window {
            return Err(Error::AckTimeout {
                line: line.to_string(),
                waited: start.elapsed(),
            });
        }
        let reply = read()?;
        if reply.is_empty() {
            continue;
        }
        match ReplyKind::classify(&reply) {
            ReplyKind::Ok => return Ok(reply),
            ReplyKind::Fault => {
                error!("{} (for: {})", reply, line);
                return Err(Error::Protocol {
                    line: line.to_string(),
                    reply,
                });
            }
            ReplyKind::Info => debug!("ignoring unsolicited reply: {}", reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MachineState;

    fn virtual_machine() -> GrblMachine {
        GrblMachine::new(Settings::simulated()).unwrap()
    }

    fn sent(machine: &GrblMachine) -> Vec<String> {
        machine
            .link()
            .simulator()
            .map(|sim| sim.sent().to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        let mut settings = Settings::simulated();
        settings.bounds.x.low = 100.0;
        settings.bounds.x.high = 0.0;
        assert!(matches!(GrblMachine::new(settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_send_lines_skips_blank_lines() {
        let mut machine = virtual_machine();
        let acks = machine
            .send_lines(["G0 X1", "", "  ", "G0 X2"])
            .unwrap();
        assert_eq!(acks, vec!["ok", "ok"]);
        assert_eq!(sent(&machine), vec!["G0 X1", "G0 X2"]);
    }

    #[test]
    fn test_query_status_reports_simulated_position() {
        let mut machine = virtual_machine();
        machine.send_lines(["G0 X10.5 Y20 Z-1"]).unwrap();
        let status = machine.query_status().unwrap();
        assert_eq!(status.state, MachineState::Idle);
        assert_eq!(status.mpos, [10.5, 20.0, -1.0]);
    }

    #[test]
    fn test_move_to_point_rejects_out_of_bounds() {
        let mut machine = virtual_machine();
        let result = machine
            .move_to_point(Target::xyz(9999.0, 0.0, 0.0), DEFAULT_FEED, MoveKind::Linear)
            .unwrap();
        assert!(result.is_none());
        assert!(sent(&machine).is_empty());
    }

    #[test]
    fn test_move_to_point_partial_axes() {
        let mut machine = virtual_machine();
        let acks = machine
            .move_to_point(
                Target::default().with_x(12.0),
                1500,
                MoveKind::Rapid,
            )
            .unwrap()
            .unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(sent(&machine), vec!["G0 X12.000 F1500"]);
    }

    #[test]
    fn test_safe_move_sequence_shape() {
        let mut machine = virtual_machine();
        machine
            .move_to_point_safe(30.0, 40.0, -5.0, 2000, MoveKind::Linear)
            .unwrap()
            .unwrap();
        assert_eq!(
            sent(&machine),
            vec![
                "G53 G0 Z0",
                "G90",
                "G1 X30.000 Y40.000 F2000",
                "G1 Z-5.000",
            ]
        );
    }

    #[test]
    fn test_safe_move_rejected_builds_no_lines() {
        let mut machine = virtual_machine();
        let result = machine
            .move_to_point_safe(0.0, 0.0, -9999.0, DEFAULT_FEED, MoveKind::Linear)
            .unwrap();
        assert!(result.is_none());
        assert!(sent(&machine).is_empty());
    }

    #[test]
    fn test_wait_until_idle_rejects_bad_poll_rate() {
        let mut machine = virtual_machine();
        assert!(matches!(
            machine.wait_until_idle(0.0, Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_run_program_empty_is_a_noop() {
        let mut machine = virtual_machine();
        let acks = machine.run_program("\n  \n\n", true).unwrap();
        assert!(acks.is_empty());
        assert!(sent(&machine).is_empty());
    }

    /// Feeds `pump_replies` a scripted reply sequence.
    fn scripted(replies: &[&str]) -> impl FnMut() -> Result<String> {
        let mut queue: Vec<String> = replies.iter().rev().map(|s| s.to_string()).collect();
        move || Ok(queue.pop().unwrap_or_default())
    }

    #[test]
    fn test_pump_replies_skips_noise_until_ok() {
        let reply = pump_replies(
            "G0 X1",
            Duration::from_secs(5),
            scripted(&["", "[MSG:Pgm End]", "ok"]),
        )
        .unwrap();
        assert_eq!(reply, "ok");
    }

    #[test]
    fn test_pump_replies_surfaces_error_reply() {
        let result = pump_replies("G1 X9", Duration::from_secs(5), scripted(&["error:9"]));
        match result {
            Err(Error::Protocol { line, reply }) => {
                assert_eq!(line, "G1 X9");
                assert_eq!(reply, "error:9");
            }
            other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_pump_replies_surfaces_alarm_reply() {
        let result = pump_replies(
            "$H",
            Duration::from_secs(5),
            scripted(&["[MSG:Reset to continue]", "ALARM:1"]),
        );
        assert!(matches!(result, Err(Error::Protocol { reply, .. }) if reply == "ALARM:1"));
    }

    #[test]
    fn test_pump_replies_times_out_on_silent_link() {
        let result = pump_replies("G0 X1", Duration::from_millis(5), || Ok(String::new()));
        assert!(matches!(result, Err(Error::AckTimeout { line, .. }) if line == "G0 X1"));
    }
}
