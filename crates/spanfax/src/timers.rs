// SPDX-License-Identifier: Apache-2.0 OR MIT

//! T0..T5 timers, driven by sample counts rather than wall-clock time.
//!
//! All T.30 timers are specified in seconds against an 8 kHz PCM stream;
//! they are decremented by the number of samples passed to
//! [`crate::session::FaxSession::rx_process`]. `Samples` is a distinct type
//! (not a bare `u32`) so a sample count can never be silently substituted
//! for a buffering length elsewhere in the crate.

/// A duration expressed in 8 kHz audio samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Samples(pub u32);

/// The 8 kHz PCM sample rate every timer in this module is scaled against.
pub const SAMPLE_RATE_HZ: u32 = 8000;

impl Samples {
    /// Construct from a duration in whole milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u32) -> Self {
        Samples(ms.saturating_mul(SAMPLE_RATE_HZ) / 1000)
    }

    /// Construct from a duration in whole seconds.
    #[must_use]
    pub const fn from_secs(s: u32) -> Self {
        Samples(s.saturating_mul(SAMPLE_RATE_HZ))
    }

    /// This duration rendered as whole milliseconds (rounded down).
    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0 / (SAMPLE_RATE_HZ / 1000)
    }
}

impl std::ops::Add for Samples {
    type Output = Samples;
    fn add(self, rhs: Samples) -> Samples {
        Samples(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Samples {
    type Output = Samples;
    fn sub(self, rhs: Samples) -> Samples {
        Samples(self.0.saturating_sub(rhs.0))
    }
}

/// Identifies which of the six T.30 timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// Initial connect timeout (60 s).
    T0,
    /// First valid response timeout (35 s).
    T1,
    /// Within-sequence response timeout (6 s).
    T2,
    /// Operator-alert timeout (10 s).
    T3,
    /// Command-response turnaround timeout (3 s).
    T4,
    /// ECM recovery timeout (60 s).
    T5,
}

impl TimerId {
    /// Human-readable name, used in log messages and `Error::TimerExpired`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::T0 => "T0",
            Self::T1 => "T1",
            Self::T2 => "T2",
            Self::T3 => "T3",
            Self::T4 => "T4",
            Self::T5 => "T5",
        }
    }

    /// Default duration per §4.1.
    #[must_use]
    pub const fn default_duration(self) -> Samples {
        match self {
            Self::T0 => Samples::from_secs(60),
            Self::T1 => Samples::from_secs(35),
            Self::T2 => Samples::from_secs(6),
            Self::T3 => Samples::from_secs(10),
            Self::T4 => Samples::from_secs(3),
            Self::T5 => Samples::from_secs(60),
        }
    }
}

/// A single countdown timer armed in sample units.
#[derive(Debug, Clone, Copy, Default)]
struct Countdown {
    remaining: Option<Samples>,
}

impl Countdown {
    fn arm(&mut self, duration: Samples) {
        self.remaining = Some(duration);
    }

    fn cancel(&mut self) {
        self.remaining = None;
    }

    fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    /// Advance by `elapsed` samples. Returns `true` exactly once, the tick
    /// on which the timer transitions from armed to expired.
    fn tick(&mut self, elapsed: Samples) -> bool {
        match self.remaining {
            Some(r) if r.0 <= elapsed.0 => {
                self.remaining = None;
                true
            }
            Some(r) => {
                self.remaining = Some(r - elapsed);
                false
            }
            None => false,
        }
    }
}

/// The six T.30 timers for one session, advanced together on every
/// `rx_process` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerSet {
    t0: Countdown,
    t1: Countdown,
    t2: Countdown,
    t3: Countdown,
    t4: Countdown,
    t5: Countdown,
}

impl TimerSet {
    /// A timer set with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `timer` for its default duration.
    pub fn arm(&mut self, timer: TimerId) {
        self.arm_for(timer, timer.default_duration());
    }

    /// Arm `timer` for an explicit duration (used for ECM recovery windows
    /// and tests).
    pub fn arm_for(&mut self, timer: TimerId, duration: Samples) {
        self.slot_mut(timer).arm(duration);
    }

    /// Disarm `timer`, e.g. because the expected response arrived.
    pub fn cancel(&mut self, timer: TimerId) {
        self.slot_mut(timer).cancel();
    }

    /// Whether `timer` is currently counting down.
    #[must_use]
    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.slot(timer).is_armed()
    }

    /// Advance every armed timer by `elapsed` samples and return the set of
    /// timers that expired on this call, in T0..T5 order.
    pub fn tick(&mut self, elapsed: Samples) -> Vec<TimerId> {
        let mut expired = Vec::new();
        for timer in [
            TimerId::T0,
            TimerId::T1,
            TimerId::T2,
            TimerId::T3,
            TimerId::T4,
            TimerId::T5,
        ] {
            if self.slot_mut(timer).tick(elapsed) {
                expired.push(timer);
            }
        }
        expired
    }

    fn slot(&self, timer: TimerId) -> &Countdown {
        match timer {
            TimerId::T0 => &self.t0,
            TimerId::T1 => &self.t1,
            TimerId::T2 => &self.t2,
            TimerId::T3 => &self.t3,
            TimerId::T4 => &self.t4,
            TimerId::T5 => &self.t5,
        }
    }

    fn slot_mut(&mut self, timer: TimerId) -> &mut Countdown {
        match timer {
            TimerId::T0 => &mut self.t0,
            TimerId::T1 => &mut self.t1,
            TimerId::T2 => &mut self.t2,
            TimerId::T3 => &mut self.t3,
            TimerId::T4 => &mut self.t4,
            TimerId::T5 => &mut self.t5,
        }
    }
}
