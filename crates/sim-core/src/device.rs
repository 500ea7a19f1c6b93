//! Host boundary for simulated devices.
//!
//! A device is a synchronous state machine advanced by a scheduler. The
//! scheduler owns simulated time, calls [`Device::update`] once per tick with
//! the current inputs, and uses the returned [`DeviceUpdate::call_at`] to
//! decide when the device next wants to run. Devices perform no I/O and never
//! block inside `update`.

use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Simulation time in nanoseconds since the scheduler started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Convert seconds to simulation time, saturating on overflow and
    /// clamping negative values to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1e9) as u64)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Result of one device tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate<O> {
    /// Output values to propagate to wired components.
    pub outputs: O,
    /// When the device next wants to be updated; `None` means only on the
    /// next interrupt or input change.
    pub call_at: Option<SimTime>,
}

impl<O> DeviceUpdate<O> {
    pub fn new(outputs: O, call_at: Option<SimTime>) -> Self {
        Self { outputs, call_at }
    }
}

/// A simulated device driven by a host scheduler.
pub trait Device: Send + 'static {
    /// Inputs delivered each tick. Missing inputs take their default.
    type Inputs: Default + Send + 'static;
    /// Outputs produced each tick.
    type Outputs: Send + 'static;

    /// Advance the device to `time`.
    fn update(&mut self, time: SimTime, inputs: &Self::Inputs) -> DeviceUpdate<Self::Outputs>;
}
