// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fast-modem orchestration: training/fallback bookkeeping and bit-level
//! event routing for V.27ter/V.29/V.17, per §4.1 and §9 Design Notes.
//!
//! The actual DSP (equalizer, carrier recovery, trellis decoding) is an
//! external collaborator behind the [`FastModem`] trait (§1 Non-goals).
//! What this module owns is the tagged-union event vocabulary that
//! replaces the source's negative-integer status sentinels, and the
//! pull-based audio/bit plumbing a [`crate::session::FaxSession`] drives.

use crate::frame::BitRateModem;

/// A per-bit signal from a receiving fast modem. A real demodulator
/// callback overloads its bit value with negative out-of-band status
/// codes (carrier loss, framing error, abort); here each case is its own
/// variant instead (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitEvent {
    /// One demodulated data bit.
    Bit(bool),
    /// Carrier dropped mid-stream.
    CarrierDown,
    /// A framing boundary was recognized (modem-specific, e.g. a V.17
    /// frame sync word).
    FramingOk,
    /// A framing boundary was expected but not found.
    FramingError,
    /// The demodulator detected an abort condition and is discarding the
    /// current frame.
    Abort,
}

/// A training/carrier lifecycle event for one [`FastModem`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemEvent {
    /// Training began at the given rate.
    TrainingStarted(BitRateModem),
    /// Training completed; the channel is ready to carry data.
    TrainingSucceeded(BitRateModem),
    /// Training did not complete in the allotted window (§8: triggers the
    /// fallback sequence).
    TrainingFailed(BitRateModem),
    /// Carrier was lost after a successful training.
    CarrierLost,
}

/// A fast data modem (V.27ter/V.29/V.17 at one of their supported rates).
/// Implementations own the actual DSP; this crate only pulls/pushes
/// samples and bits and polls for lifecycle events.
pub trait FastModem {
    /// The rate this instance is trained for.
    fn rate(&self) -> BitRateModem;

    /// Begin (re)training at [`FastModem::rate`].
    fn begin_training(&mut self);

    /// Non-blocking poll for a training/carrier lifecycle event. `None`
    /// means nothing new since the last poll.
    fn poll_event(&mut self) -> Option<ModemEvent>;

    /// Feed received PCM samples in for demodulation.
    fn feed_audio(&mut self, samples: &[i16]);

    /// Pull PCM samples to transmit. Returns the number of samples
    /// written into `out`.
    fn pull_audio(&mut self, out: &mut [i16]) -> usize;

    /// Queue bits for modulation and transmission.
    fn send_bits(&mut self, bits: &[bool]);

    /// Non-blocking poll for the next demodulated bit event.
    fn poll_bit(&mut self) -> Option<BitEvent>;
}

/// Orchestrates the single active fast modem for a session: tracks the
/// fallback candidate list and routes training failures to the next
/// slower rate, per §4.1's fallback sequence and §8's exhaustion rule.
pub struct ModemBank {
    active: Option<Box<dyn FastModem>>,
    fallback_remaining: Vec<BitRateModem>,
}

impl ModemBank {
    /// A bank with no modem attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: None,
            fallback_remaining: Vec::new(),
        }
    }

    /// Record the full set of rates this session may fall back through,
    /// fastest first. Call once at the start of a negotiation.
    pub fn begin_negotiation(&mut self, candidates: &[BitRateModem]) {
        self.fallback_remaining = candidates.to_vec();
    }

    /// Attach the modem instance to drive next (already constructed and
    /// configured for its rate by the caller).
    pub fn attach(&mut self, modem: Box<dyn FastModem>) {
        self.active = Some(modem);
    }

    /// Detach and discard the active modem, e.g. when falling back to the
    /// next rate requires a freshly constructed instance.
    pub fn detach(&mut self) -> Option<Box<dyn FastModem>> {
        self.active.take()
    }

    /// Whether a modem is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    /// The attached modem's rate, if any.
    #[must_use]
    pub fn active_rate(&self) -> Option<BitRateModem> {
        self.active.as_ref().map(|m| m.rate())
    }

    /// Given a training-failure event for `rate`, and assuming `rate` was
    /// part of the negotiation's candidate list, return the next slower
    /// rate to retry, or `None` if the fallback sequence is exhausted
    /// (§8 "Fallback exhaustion").
    #[must_use]
    pub fn next_fallback(&self, rate: BitRateModem) -> Option<BitRateModem> {
        rate.fall_back()
            .filter(|next| self.fallback_remaining.contains(next))
    }

    /// Route one poll of the active modem's lifecycle events, if any.
    pub fn poll_event(&mut self) -> Option<ModemEvent> {
        self.active.as_mut().and_then(|m| m.poll_event())
    }

    /// Feed received audio to the active modem. No-op if nothing attached.
    pub fn feed_audio(&mut self, samples: &[i16]) {
        if let Some(modem) = &mut self.active {
            modem.feed_audio(samples);
        }
    }

    /// Pull audio to transmit from the active modem. Returns 0 if nothing
    /// attached.
    pub fn pull_audio(&mut self, out: &mut [i16]) -> usize {
        self.active.as_mut().map_or(0, |m| m.pull_audio(out))
    }

    /// Queue bits for the active modem to transmit. No-op if nothing
    /// attached.
    pub fn send_bits(&mut self, bits: &[bool]) {
        if let Some(modem) = &mut self.active {
            modem.send_bits(bits);
        }
    }

    /// Poll the active modem for its next demodulated bit event.
    pub fn poll_bit(&mut self) -> Option<BitEvent> {
        self.active.as_mut().and_then(|m| m.poll_bit())
    }
}

impl Default for ModemBank {
    fn default() -> Self {
        Self::new()
    }
}
