// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The T.30 procedure engine: `FaxSession` owns call state, drives phase
//! and state transitions, and dispatches callbacks to the application,
//! per §4.1 and §6.
//!
//! Driven entirely by external calls (`rx_process`/`on_frame`/
//! `tx_process`); no internal threads or suspension points, per §5. One
//! session must never be entered from two threads at once; concurrency
//! is the caller's responsibility, one session per thread.

use crate::error::{Error, Result};
use crate::frame::{BitRateModem, Capabilities, FrameType};
use crate::hdlc::{BitStuffer, HdlcFrame, HdlcTransmitter};
use crate::modem::{FastModem, ModemBank, ModemEvent};
use crate::page::{PageCodec, TransferStatistics};
use crate::timers::{Samples, TimerId, TimerSet};
use crate::{debug, warn};
use std::collections::VecDeque;

/// Which end of the call this session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Originated the call (emits CNG, listens for DIS).
    Caller,
    /// Answered the call (emits CED then DIS).
    Answerer,
}

/// Coarse call lifecycle, per §2/§4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Caller: emitting CNG, listening for V.21.
    ACng,
    /// Answerer: emitting CED, about to send DIS.
    ACed,
    /// Receiving a capability/command burst on V.21.
    BdeRx,
    /// Transmitting a capability/command burst on V.21.
    BdeTx,
    /// Receiving page data on the fast modem.
    CRx,
    /// Transmitting page data on the fast modem.
    CTx,
    /// Disconnect in progress.
    E,
    /// Call complete; no further audio will be generated.
    Finished,
}

/// Micro-position within a phase, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Idle prior to the first capability exchange.
    B,
    /// Sender has chosen parameters (DCS sent), about to train.
    C,
    /// Training (TCF) in progress as the transmitting side.
    D,
    /// Training (TCF) in progress as the verifying side.
    DTcf,
    /// Listening for a command.
    F,
    /// Verifying a received TCF burst.
    FTcf,
    /// Received MPS, sent MCF; awaiting next page or EOP/EOM.
    FMpsMcf,
    /// Received EOP, sent MCF; call winding down.
    FEopMcf,
    /// Listening for the answerer's initial capability frame.
    R,
    /// Transmitting the initial capability frame.
    T,
    /// Transmitting page data.
    I,
    /// Receiving page data.
    Ii,
    /// Received page data, about to send MPS.
    IiMps,
    /// Received page data, about to send EOP.
    IiEop,
    /// Received page data, about to send EOM.
    IiEom,
}

/// The outcome reported exactly once via the phase-E callback (§4.1,
/// "Events emitted to caller").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Ok,
    TimerExpired,
    TrainingFailed,
    ProtocolViolation,
    RemoteCannotReceive,
    RemoteCannotSend,
    PageCountMismatch,
    Cancelled,
    /// The `PageCodec` collaborator failed to open or write the TIFF file
    /// (§7 resource-failure).
    IoError,
}

/// Bounded retries at the current rate before falling back one step, for
/// a DIS received mid-`DTcf` (Decided Open Question, §4.1).
const MAX_RETRIES_AT_CURRENT_RATE: u8 = 2;
/// Minimum clean-zero duration for a valid TCF burst (Decided Open
/// Question, §4.1). No tolerance window.
pub const TCF_MIN_VALID_MS: u32 = 1500;

type PhaseBHandler = Box<dyn FnMut(u8)>;
type PhaseDHandler = Box<dyn FnMut(FrameType)>;
type PhaseEHandler = Box<dyn FnMut(CompletionCode)>;
type FlushHandler = Box<dyn FnMut(u32)>;

/// The T.30 procedure engine for one call.
pub struct FaxSession {
    role: Role,
    phase: Phase,
    state: State,
    timers: TimerSet,
    local_ident: String,
    sub_address: Option<String>,
    header_info: Option<String>,
    page_codec: Option<Box<dyn PageCodec>>,
    local_caps: Capabilities,
    remote_caps: Option<Capabilities>,
    supported_rates: Vec<BitRateModem>,
    chosen_rate: Option<BitRateModem>,
    retries_at_current_rate: u8,
    queued_phase: Option<Phase>,
    carrier_present: bool,
    modem_bank: ModemBank,
    hdlc_tx: Option<HdlcTransmitter<Box<dyn BitStuffer>>>,
    tx_queue: VecDeque<Vec<HdlcFrame>>,
    tx_burst_cursor: usize,
    stats: TransferStatistics,
    completion: Option<CompletionCode>,
    phase_b_handler: Option<PhaseBHandler>,
    phase_d_handler: Option<PhaseDHandler>,
    phase_e_handler: Option<PhaseEHandler>,
    flush_handler: Option<FlushHandler>,
}

impl FaxSession {
    /// A freshly constructed session. Caller-role sessions start in
    /// `Phase::ACng`/`State::T` with `T1` armed; answerer-role sessions
    /// start in `Phase::ACed`/`State::R` (§4.1).
    #[must_use]
    pub fn new(is_caller: bool) -> Self {
        let role = if is_caller { Role::Caller } else { Role::Answerer };
        let (phase, state) = match role {
            Role::Caller => (Phase::ACng, State::T),
            Role::Answerer => (Phase::ACed, State::R),
        };
        let mut timers = TimerSet::new();
        timers.arm(TimerId::T1);

        Self {
            role,
            phase,
            state,
            timers,
            local_ident: String::new(),
            sub_address: None,
            header_info: None,
            page_codec: None,
            local_caps: Capabilities::default(),
            remote_caps: None,
            supported_rates: BitRateModem::FALLBACK_ORDER.to_vec(),
            chosen_rate: None,
            retries_at_current_rate: 0,
            queued_phase: None,
            carrier_present: false,
            modem_bank: ModemBank::new(),
            hdlc_tx: None,
            tx_queue: VecDeque::new(),
            tx_burst_cursor: 0,
            stats: TransferStatistics::new(),
            completion: None,
            phase_b_handler: None,
            phase_d_handler: None,
            phase_e_handler: None,
            flush_handler: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn statistics(&self) -> TransferStatistics {
        self.stats
    }

    #[must_use]
    pub fn completion_code(&self) -> Option<CompletionCode> {
        self.completion
    }

    /// Set the local station identifier used in TSI/CSI frames (§6, ≤20
    /// ASCII characters).
    pub fn set_local_ident(&mut self, ident: &str) -> Result<()> {
        if !ident.is_ascii() || ident.len() > crate::frame::IDENT_FIELD_LEN {
            return Err(Error::InvalidIdent(ident.to_string()));
        }
        self.local_ident = ident.to_string();
        Ok(())
    }

    /// Set the sub-address carried in SUB frames (§6, ≤20 ASCII characters).
    pub fn set_sub_address(&mut self, sub_address: &str) -> Result<()> {
        if !sub_address.is_ascii() || sub_address.len() > crate::frame::IDENT_FIELD_LEN {
            return Err(Error::InvalidSubAddress(sub_address.to_string()));
        }
        self.sub_address = Some(sub_address.to_string());
        Ok(())
    }

    /// Set the free-form header line stamped across the top of each
    /// transmitted page (§6). T.30 places no wire-field length limit on
    /// this text; it is the `PageCodec` collaborator's concern once a
    /// page is actually rendered.
    pub fn set_header_info(&mut self, header_info: &str) {
        self.header_info = Some(header_info.to_string());
    }

    /// Attach the `PageCodec` collaborator that `set_tx_file`/`set_rx_file`
    /// forward to (§6).
    pub fn set_page_codec(&mut self, codec: Box<dyn PageCodec>) {
        self.page_codec = Some(codec);
    }

    /// Forward to the attached `PageCodec`'s `set_tx_file` (§6). A failure
    /// reported by the codec is a resource-failure (§7): the call ends
    /// immediately with `CompletionCode::IoError`.
    pub fn set_tx_file(&mut self, path: &str) -> Result<()> {
        match &mut self.page_codec {
            Some(codec) => {
                let result = codec.set_tx_file(path);
                if result.is_err() {
                    self.finish_with_dcn(CompletionCode::IoError);
                }
                result
            }
            None => Err(Error::PageCodec("no page codec attached".to_string())),
        }
    }

    /// Forward to the attached `PageCodec`'s `set_rx_file` (§6). Same
    /// resource-failure handling as `set_tx_file`.
    pub fn set_rx_file(&mut self, path: &str) -> Result<()> {
        match &mut self.page_codec {
            Some(codec) => {
                let result = codec.set_rx_file(path);
                if result.is_err() {
                    self.finish_with_dcn(CompletionCode::IoError);
                }
                result
            }
            None => Err(Error::PageCodec("no page codec attached".to_string())),
        }
    }

    pub fn set_phase_b_handler(&mut self, handler: PhaseBHandler) {
        self.phase_b_handler = Some(handler);
    }

    pub fn set_phase_d_handler(&mut self, handler: PhaseDHandler) {
        self.phase_d_handler = Some(handler);
    }

    pub fn set_phase_e_handler(&mut self, handler: PhaseEHandler) {
        self.phase_e_handler = Some(handler);
    }

    pub fn set_flush_handler(&mut self, handler: FlushHandler) {
        self.flush_handler = Some(handler);
    }

    /// The rates this session will offer/accept, fastest first.
    pub fn set_supported_rates(&mut self, rates: &[BitRateModem]) {
        self.supported_rates = rates.to_vec();
    }

    /// Advance all timers by the number of samples in `buf`, feed `buf` to
    /// the active fast modem (§4.2 `feed_audio`), and apply any resulting
    /// timer or modem-lifecycle actions. Returns `buf.len()` on normal
    /// progress, 0 once the session has reached `Phase::Finished`.
    pub fn rx_process(&mut self, buf: &[i16]) -> usize {
        if self.phase == Phase::Finished {
            return 0;
        }

        for expired in self.timers.tick(Samples(buf.len() as u32)) {
            self.on_timer_expired(expired);
        }

        self.modem_bank.feed_audio(buf);
        while let Some(event) = self.modem_bank.poll_event() {
            self.on_modem_event(event);
            if self.phase == Phase::Finished {
                break;
            }
        }

        buf.len()
    }

    /// Attach the `BitStuffer` collaborator outgoing control frames are
    /// stuffed through before reaching the V.21 FSK channel (§4.3). Every
    /// composed frame is sequenced through `HdlcTransmitter` so preamble
    /// and inter-/post-frame flag timing live in one place.
    pub fn attach_bit_stuffer(&mut self, stuffer: Box<dyn BitStuffer>) {
        self.hdlc_tx = Some(HdlcTransmitter::new(stuffer));
    }

    /// Pull the next outgoing control-frame burst as wire-ready octets
    /// (preamble and flags included), or `None` if nothing is queued, or
    /// if no `BitStuffer` has been attached yet. Mirrors `tx_process`'s
    /// pull model, but for the V.21 control path rather than fast-modem
    /// audio (§4.1 "Control-frame composition", §4.3).
    pub fn poll_tx_frame(&mut self) -> Option<Vec<u8>> {
        let transmitter = self.hdlc_tx.as_ref()?;
        loop {
            let burst = self.tx_queue.front()?;
            if self.tx_burst_cursor >= burst.len() {
                self.tx_queue.pop_front();
                self.tx_burst_cursor = 0;
                continue;
            }
            let frame = &burst[self.tx_burst_cursor];
            let first = self.tx_burst_cursor == 0;
            let last = self.tx_burst_cursor == burst.len() - 1;
            let sequence = transmitter.build_sequence(frame, first, last);
            self.tx_burst_cursor += 1;
            return Some(sequence);
        }
    }

    /// Pull the next queued outgoing control frame one at a time, without
    /// the preamble/flag wire framing `poll_tx_frame` adds. For bridges
    /// (the T.38 gateway) that exchange already-assembled HDLC frames over
    /// IP rather than modulating V.21 themselves (§4.4): T.38 carries the
    /// frame content the far gateway's own modem re-stuffs for the PSTN
    /// side, not a bit-stuffed bitstream.
    pub fn poll_tx_hdlc_frame(&mut self) -> Option<HdlcFrame> {
        loop {
            let burst = self.tx_queue.front()?;
            if self.tx_burst_cursor >= burst.len() {
                self.tx_queue.pop_front();
                self.tx_burst_cursor = 0;
                continue;
            }
            let frame = burst[self.tx_burst_cursor].clone();
            self.tx_burst_cursor += 1;
            return Some(frame);
        }
    }

    fn queue_tx_burst(&mut self, frames: Vec<HdlcFrame>) {
        if !frames.is_empty() {
            self.tx_queue.push_back(frames);
        }
    }

    fn queue_csi_dis(&mut self) -> Result<()> {
        let ident = crate::frame::encode_ident(&self.local_ident)?;
        let csi = HdlcFrame::new(FrameType::Csi, ident.to_vec());
        let dis = HdlcFrame::new(FrameType::Dis, self.local_caps.encode());
        self.queue_tx_burst(vec![csi, dis]);
        Ok(())
    }

    fn queue_tsi_dcs(&mut self, rate: BitRateModem) -> Result<()> {
        let ident = crate::frame::encode_ident(&self.local_ident)?;
        let mut dcs = self.local_caps;
        dcs.rate = rate;
        dcs.ready_to_transmit = true;
        let tsi = HdlcFrame::new(FrameType::Tsi, ident.to_vec());
        let dcs_frame = HdlcFrame::new(FrameType::Dcs, dcs.encode());
        self.queue_tx_burst(vec![tsi, dcs_frame]);
        Ok(())
    }

    /// Answerer-side trigger for the Phase ACed -> BdeTx transition
    /// (§4.1): the caller invokes this once the 2100 Hz CED burst and its
    /// trailing 0.2 s silence have played out. Composes and queues
    /// CSI + DIS and arms T2 to await DCS. No-op outside `Phase::ACed`.
    pub fn begin_answer(&mut self) -> Result<()> {
        if self.role != Role::Answerer || self.phase != Phase::ACed {
            return Ok(());
        }
        self.queue_csi_dis()?;
        self.timers.arm(TimerId::T2);
        self.queue_phase(Phase::BdeTx);
        Ok(())
    }

    /// Sender-side page-boundary signal: the `PageCodec` collaborator's
    /// encoder has reached end-of-page and the fast modem's data has been
    /// closed (§4.1 "Page transfer"). Queues `which` (MPS, EOM, or EOP)
    /// and switches to Phase BdeTx to await the receiver's MCF/RTP/RTN.
    pub fn send_page_boundary(&mut self, which: FrameType) -> Result<()> {
        self.queue_tx_burst(vec![HdlcFrame::new(which, vec![])]);
        self.timers.arm(TimerId::T4);
        self.queue_phase(Phase::BdeTx);
        self.state = State::B;
        Ok(())
    }

    /// Attach a constructed, rate-configured fast modem for the
    /// orchestration layer to drive (§4.2 `prepare`). The caller owns
    /// picking and constructing the concrete `FastModem`; this crate only
    /// routes audio/bit traffic and lifecycle events through it.
    pub fn attach_fast_modem(&mut self, modem: Box<dyn FastModem>) {
        self.modem_bank.attach(modem);
    }

    /// Detach and return the active fast modem, e.g. before constructing a
    /// fresh instance for a fallback rate.
    pub fn detach_fast_modem(&mut self) -> Option<Box<dyn FastModem>> {
        self.modem_bank.detach()
    }

    /// React to a lifecycle event polled from the active fast modem (§4.2,
    /// §9 "tagged event replacing sentinel overload"). Training failure
    /// falls back a rate; carrier loss mid-session is treated the same as
    /// a dropped receive carrier.
    fn on_modem_event(&mut self, event: ModemEvent) {
        match event {
            ModemEvent::TrainingStarted(rate) => {
                debug!("fast modem training started at {:?}", rate);
            }
            ModemEvent::TrainingSucceeded(rate) => {
                debug!("fast modem training succeeded at {:?}", rate);
            }
            ModemEvent::TrainingFailed(rate) => {
                debug!("fast modem training failed at {:?}", rate);
                let _ = self.fall_back_rate();
            }
            ModemEvent::CarrierLost => {
                warn!("fast modem carrier lost in phase {:?} state {:?}", self.phase, self.state);
                self.carrier_down();
            }
        }
    }

    /// Pull outgoing audio. The real DSP fill is delegated to the
    /// orchestration layer (§4.2); this crate only enforces the
    /// monotonic-phase-advance guarantee (§5 ordering guarantee 2).
    pub fn tx_process(&mut self, buf: &mut [i16]) -> usize {
        if self.phase == Phase::Finished {
            buf.iter_mut().for_each(|s| *s = 0);
            return 0;
        }
        self.modem_bank.pull_audio(buf)
    }

    /// Cancel the call: transition to `Phase::E` with
    /// `CompletionCode::Cancelled` and drain queued callbacks (§5
    /// "Cancellation and timeout").
    pub fn release(&mut self) {
        self.finish_with_dcn(CompletionCode::Cancelled);
    }

    /// Report a carrier-present transition on the line the session is
    /// currently listening on. A queued phase change latches until
    /// carrier drops; a carrier-up arriving first cancels the queued
    /// change instead of silently dropping it (Decided Open Question,
    /// §4.1).
    pub fn carrier_up(&mut self) {
        if let Some(queued) = self.queued_phase.take() {
            warn!(
                "carrier-up preempted a queued phase change to {:?}; change discarded",
                queued
            );
        }
        self.carrier_present = true;
    }

    /// Report carrier-absent. Applies any phase change queued while
    /// carrier was present.
    pub fn carrier_down(&mut self) {
        self.carrier_present = false;
        if let Some(queued) = self.queued_phase.take() {
            self.apply_phase_change(queued);
        }
    }

    /// Request a phase change. Applied immediately if carrier is
    /// currently absent; otherwise queued until `carrier_down` (§4.1
    /// phase-change contract, Decided Open Question).
    fn queue_phase(&mut self, phase: Phase) {
        if self.carrier_present {
            self.queued_phase = Some(phase);
        } else {
            self.apply_phase_change(phase);
        }
    }

    /// Apply the phase-change contract in order: mark receive-signal
    /// absent, (DSP init is the modem bank's job), flush, record the new
    /// phase (§4.1 "Phase-change contract").
    fn apply_phase_change(&mut self, phase: Phase) {
        self.carrier_present = false;
        if let Some(handler) = &mut self.flush_handler {
            handler(0);
        }
        debug!("phase change {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn on_timer_expired(&mut self, timer: TimerId) {
        debug!("{} expired in phase {:?} state {:?}", timer.name(), self.phase, self.state);
        match timer {
            TimerId::T1 => {
                // T1 -> disconnect; the answerer additionally sends DCN
                // since it already owns the line (§4.1 "Disconnect").
                if self.role == Role::Answerer {
                    self.finish_with_dcn(CompletionCode::TimerExpired);
                } else {
                    self.finish(CompletionCode::TimerExpired);
                }
            }
            TimerId::T2 => {
                // Re-issue the appropriate identifier+capability frame;
                // the application layer (which owns frame construction
                // for retransmission) is expected to notice state is
                // unchanged and retry. We re-arm so the session doesn't
                // spin on a single elapsed tick.
                self.timers.arm(TimerId::T2);
            }
            TimerId::T4 => {
                self.timers.arm(TimerId::T4);
            }
            _ => {
                self.finish_with_dcn(CompletionCode::TimerExpired);
            }
        }
    }

    /// Dispatch one received, already-validated control frame into the
    /// state machine. This is the seam a caller or the T.38 translator
    /// feeds recovered HDLC frames through.
    pub fn on_frame(&mut self, frame: &HdlcFrame) -> Result<()> {
        self.timers.cancel(TimerId::T1);

        match frame.frame_type {
            FrameType::Dis | FrameType::Dtc => self.on_capability_frame(frame),
            FrameType::Dcs => self.on_dcs(frame),
            FrameType::Cfr => self.on_cfr(),
            FrameType::Ftt => self.on_ftt(),
            FrameType::Mcf => self.on_mcf(),
            FrameType::Rtp | FrameType::Rtn => self.on_retrain_response(),
            FrameType::Mps => self.on_page_boundary(FrameType::Mps),
            FrameType::Eop => self.on_page_boundary(FrameType::Eop),
            FrameType::Eom => self.on_page_boundary(FrameType::Eom),
            FrameType::Dcn | FrameType::Xcn => {
                self.finish(CompletionCode::Ok);
                Ok(())
            }
            _ => {
                warn!(
                    "unexpected frame {} in phase {:?} state {:?}; ignored",
                    frame.frame_type.name(),
                    self.phase,
                    self.state
                );
                Ok(())
            }
        }
    }

    fn on_capability_frame(&mut self, frame: &HdlcFrame) -> Result<()> {
        if self.state == State::DTcf {
            return self.on_dis_during_tcf();
        }

        let remote = Capabilities::decode(&frame.payload)?;
        self.timers.cancel(TimerId::T2);

        if let Some(handler) = &mut self.phase_b_handler {
            handler(frame.frame_type.fcf());
        }

        self.remote_caps = Some(remote);

        let negotiated = Capabilities::negotiate(&self.local_caps, &remote, &self.supported_rates);
        match negotiated {
            Some(rate) => {
                self.chosen_rate = Some(rate);
                self.retries_at_current_rate = 0;
                self.queue_tsi_dcs(rate)?;
                self.queue_phase(Phase::BdeTx);
                self.state = State::D;
                Ok(())
            }
            None => {
                self.finish_with_dcn(CompletionCode::RemoteCannotReceive);
                Ok(())
            }
        }
    }

    /// DIS received while mid-`DTcf`: bounded retry at the same rate
    /// before falling back (Decided Open Question, §4.1).
    fn on_dis_during_tcf(&mut self) -> Result<()> {
        if self.retries_at_current_rate < MAX_RETRIES_AT_CURRENT_RATE {
            self.retries_at_current_rate += 1;
            debug!(
                "DIS during DTcf: implicit FTT, retry {}/{} at current rate",
                self.retries_at_current_rate, MAX_RETRIES_AT_CURRENT_RATE
            );
            self.state = State::D;
            Ok(())
        } else {
            self.fall_back_rate()
        }
    }

    fn on_dcs(&mut self, frame: &HdlcFrame) -> Result<()> {
        let dcs = Capabilities::decode(&frame.payload)?;
        self.remote_caps = Some(dcs);
        self.chosen_rate = Some(dcs.rate);
        self.retries_at_current_rate = 0;
        self.state = State::FTcf;
        Ok(())
    }

    /// Caller-side TCF result. `clean_zero_ms` is how much of the
    /// training burst validated as clean zero bits.
    pub fn on_tcf_result(&mut self, clean_zero_ms: u32) -> Result<()> {
        if clean_zero_ms >= TCF_MIN_VALID_MS {
            self.state = State::FTcf;
            self.stats.record_retrain();
            self.queue_tx_burst(vec![HdlcFrame::new(FrameType::Cfr, vec![])]);
            self.queue_phase(Phase::BdeTx);
            Ok(())
        } else {
            self.queue_tx_burst(vec![HdlcFrame::new(FrameType::Ftt, vec![])]);
            self.timers.arm(TimerId::T4);
            self.queue_phase(Phase::BdeTx);
            self.fall_back_rate()
        }
    }

    fn fall_back_rate(&mut self) -> Result<()> {
        let Some(current) = self.chosen_rate else {
            self.finish_with_dcn(CompletionCode::TrainingFailed);
            return Ok(());
        };
        self.stats.record_fallback();
        match self.modem_bank.next_fallback(current) {
            Some(next) => {
                self.chosen_rate = Some(next);
                self.retries_at_current_rate = 0;
                self.state = State::D;
                Ok(())
            }
            None => {
                self.finish_with_dcn(CompletionCode::TrainingFailed);
                Ok(())
            }
        }
    }

    fn on_ftt(&mut self) -> Result<()> {
        self.fall_back_rate()
    }

    fn on_cfr(&mut self) -> Result<()> {
        self.state = State::I;
        self.queue_phase(Phase::CTx);
        Ok(())
    }

    fn on_mcf(&mut self) -> Result<()> {
        if let Some(handler) = &mut self.phase_d_handler {
            handler(FrameType::Mcf);
        }
        self.state = State::B;
        Ok(())
    }

    fn on_retrain_response(&mut self) -> Result<()> {
        self.stats.record_retrain();
        self.fall_back_rate()
    }

    /// A page-boundary signal (MPS/EOP/EOM) arrived from the transmitting
    /// side while this session is receiving (§4.1 "Acknowledge").
    fn on_page_boundary(&mut self, which: FrameType) -> Result<()> {
        if let Some(handler) = &mut self.phase_d_handler {
            handler(which);
        }
        self.stats.record_page(0);
        self.state = match which {
            FrameType::Mps => State::IiMps,
            FrameType::Eop => State::IiEop,
            FrameType::Eom => State::IiEom,
            _ => self.state,
        };
        self.queue_tx_burst(vec![HdlcFrame::new(FrameType::Mcf, vec![])]);
        self.queue_phase(Phase::BdeTx);
        if which == FrameType::Eop {
            self.finish(CompletionCode::Ok);
        }
        Ok(())
    }

    fn finish(&mut self, code: CompletionCode) {
        if self.phase == Phase::Finished {
            return;
        }
        self.phase = Phase::E;
        if let Some(handler) = &mut self.flush_handler {
            handler(0);
        }
        self.completion = Some(code);
        if let Some(handler) = &mut self.phase_e_handler {
            handler(code);
        }
        self.phase = Phase::Finished;
    }

    /// Locally-initiated disconnect (§4.1 "Disconnect", §7
    /// resource-failure): queue an outgoing DCN before winding the call
    /// down, so the remote end sees it rather than silence. Use plain
    /// `finish` instead when the disconnect was already signalled by the
    /// remote (we received their DCN/XCN).
    fn finish_with_dcn(&mut self, code: CompletionCode) {
        if self.phase != Phase::Finished {
            self.queue_tx_burst(vec![HdlcFrame::new(FrameType::Dcn, vec![])]);
        }
        self.finish(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BitRateModem, ImageWidth, ResolutionClass};
    use crate::modem::BitEvent;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// A `FastModem` whose lifecycle events are scripted by the test.
    struct ScriptedModem {
        rate: BitRateModem,
        events: VecDeque<ModemEvent>,
    }

    impl ScriptedModem {
        fn new(rate: BitRateModem, events: Vec<ModemEvent>) -> Self {
            Self { rate, events: events.into() }
        }
    }

    impl FastModem for ScriptedModem {
        fn rate(&self) -> BitRateModem {
            self.rate
        }
        fn begin_training(&mut self) {}
        fn poll_event(&mut self) -> Option<ModemEvent> {
            self.events.pop_front()
        }
        fn feed_audio(&mut self, _samples: &[i16]) {}
        fn pull_audio(&mut self, out: &mut [i16]) -> usize {
            out.iter_mut().for_each(|s| *s = 0);
            out.len()
        }
        fn send_bits(&mut self, _bits: &[bool]) {}
        fn poll_bit(&mut self) -> Option<BitEvent> {
            None
        }
    }

    #[test]
    fn caller_starts_in_acng_t_with_t1_armed() {
        let session = FaxSession::new(true);
        assert_eq!(session.phase(), Phase::ACng);
        assert_eq!(session.state(), State::T);
    }

    #[test]
    fn answerer_starts_in_aced_r() {
        let session = FaxSession::new(false);
        assert_eq!(session.phase(), Phase::ACed);
        assert_eq!(session.state(), State::R);
    }

    #[test]
    fn set_local_ident_rejects_overlength() {
        let mut session = FaxSession::new(true);
        assert!(session.set_local_ident(&"x".repeat(21)).is_err());
        assert!(session.set_local_ident("+15550100").is_ok());
    }

    #[test]
    fn t1_expiry_finishes_with_timer_expired() {
        let mut session = FaxSession::new(true);
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = Rc::clone(&seen);
        session.set_phase_e_handler(Box::new(move |code| {
            *seen_clone.borrow_mut() = Some(code);
        }));

        session.rx_process(&vec![0i16; (crate::timers::SAMPLE_RATE_HZ * 35) as usize]);

        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(*seen.borrow(), Some(CompletionCode::TimerExpired));
    }

    #[test]
    fn tx_process_returns_zero_once_finished() {
        let mut session = FaxSession::new(true);
        session.release();
        let mut buf = [1i16; 16];
        assert_eq!(session.tx_process(&mut buf), 0);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn capability_exchange_picks_mutual_rate_and_fires_phase_b() {
        let mut session = FaxSession::new(true);
        session.set_supported_rates(&[BitRateModem::V27ter2400, BitRateModem::V29_9600]);
        let got = Rc::new(RefCell::new(None));
        let got_clone = Rc::clone(&got);
        session.set_phase_b_handler(Box::new(move |fcf| *got_clone.borrow_mut() = Some(fcf)));

        let remote = Capabilities {
            ready_to_receive: true,
            rate: BitRateModem::V29_9600,
            ..Default::default()
        };
        let frame = HdlcFrame::new(FrameType::Dis, remote.encode());
        session.on_frame(&frame).unwrap();

        assert_eq!(*got.borrow(), Some(FrameType::Dis.fcf()));
        assert_eq!(session.state(), State::D);
    }

    #[test]
    fn capability_mismatch_finishes_remote_cannot_receive() {
        let mut session = FaxSession::new(true);
        session.set_supported_rates(&[BitRateModem::V27ter2400]);
        let remote = Capabilities {
            ready_to_receive: true,
            rate: BitRateModem::V17_14400,
            ..Default::default()
        };
        let frame = HdlcFrame::new(FrameType::Dis, remote.encode());
        session.on_frame(&frame).unwrap();

        assert_eq!(session.completion_code(), Some(CompletionCode::RemoteCannotReceive));
        assert_eq!(session.phase(), Phase::Finished);
    }

    #[test]
    fn dcn_finishes_the_call_ok() {
        let mut session = FaxSession::new(true);
        let frame = HdlcFrame::new(FrameType::Dcn, vec![]);
        session.on_frame(&frame).unwrap();
        assert_eq!(session.completion_code(), Some(CompletionCode::Ok));
        assert_eq!(session.phase(), Phase::Finished);
    }

    #[test]
    fn unrecognized_frame_in_state_is_ignored_without_state_change() {
        let mut session = FaxSession::new(true);
        let before = session.state();
        let frame = HdlcFrame::new(FrameType::Sub, vec![]);
        session.on_frame(&frame).unwrap();
        assert_eq!(session.state(), before);
    }

    #[test]
    fn tcf_short_of_threshold_falls_back_one_rate() {
        let mut session = FaxSession::new(true);
        session.set_supported_rates(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.modem_bank.begin_negotiation(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.chosen_rate = Some(BitRateModem::V17_14400);
        session.on_tcf_result(TCF_MIN_VALID_MS - 1).unwrap();
        assert_eq!(session.chosen_rate, Some(BitRateModem::V17_12000));
    }

    #[test]
    fn tcf_at_threshold_succeeds() {
        let mut session = FaxSession::new(true);
        session.chosen_rate = Some(BitRateModem::V27ter2400);
        session.on_tcf_result(TCF_MIN_VALID_MS).unwrap();
        assert_eq!(session.state(), State::FTcf);
    }

    #[test]
    fn dis_during_dtcf_retries_before_falling_back() {
        let mut session = FaxSession::new(true);
        session.modem_bank.begin_negotiation(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.chosen_rate = Some(BitRateModem::V17_14400);
        session.state = State::DTcf;

        let dis = HdlcFrame::new(FrameType::Dis, Capabilities::default().encode());
        session.on_frame(&dis).unwrap();
        assert_eq!(session.retries_at_current_rate, 1);
        assert_eq!(session.chosen_rate, Some(BitRateModem::V17_14400));

        session.state = State::DTcf;
        session.on_frame(&dis).unwrap();
        assert_eq!(session.retries_at_current_rate, 2);

        session.state = State::DTcf;
        session.on_frame(&dis).unwrap();
        assert_eq!(session.chosen_rate, Some(BitRateModem::V17_12000));
    }

    #[test]
    fn queued_phase_change_latches_until_carrier_drops() {
        let mut session = FaxSession::new(true);
        session.carrier_up();
        session.queue_phase(Phase::CTx);
        assert_eq!(session.phase(), Phase::ACng);
        session.carrier_down();
        assert_eq!(session.phase(), Phase::CTx);
    }

    #[test]
    fn carrier_up_preempts_a_queued_phase_change() {
        let mut session = FaxSession::new(true);
        session.carrier_up();
        session.queue_phase(Phase::CTx);
        session.carrier_up();
        assert!(session.queued_phase.is_none());
        session.carrier_down();
        // No queued change remains, phase is unchanged by the drop itself.
        assert_eq!(session.phase(), Phase::ACng);
    }

    #[test]
    fn mps_fires_phase_d_and_does_not_finish() {
        let mut session = FaxSession::new(false);
        let got = Rc::new(RefCell::new(None));
        let got_clone = Rc::clone(&got);
        session.set_phase_d_handler(Box::new(move |ft| *got_clone.borrow_mut() = Some(ft)));
        let frame = HdlcFrame::new(FrameType::Mps, vec![]);
        session.on_frame(&frame).unwrap();
        assert_eq!(*got.borrow(), Some(FrameType::Mps));
        assert_ne!(session.phase(), Phase::Finished);
    }

    #[test]
    fn eop_finishes_the_call() {
        let mut session = FaxSession::new(false);
        let frame = HdlcFrame::new(FrameType::Eop, vec![]);
        session.on_frame(&frame).unwrap();
        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(session.statistics().pages_transferred, 1);
    }

    #[test]
    fn negotiated_capabilities_use_full_octet_range() {
        // Sanity: a capability with non-default resolution/width still
        // negotiates, exercising the full Capabilities round trip from
        // within the session path.
        let mut session = FaxSession::new(true);
        session.set_supported_rates(&[BitRateModem::V17_14400]);
        let remote = Capabilities {
            ready_to_receive: true,
            rate: BitRateModem::V17_14400,
            resolution: ResolutionClass::SuperFine,
            width: ImageWidth::W2432,
            ..Default::default()
        };
        let frame = HdlcFrame::new(FrameType::Dis, remote.encode());
        session.on_frame(&frame).unwrap();
        assert_eq!(session.state(), State::D);
    }

    #[test]
    fn rx_process_feeds_audio_to_the_attached_modem() {
        let mut session = FaxSession::new(true);
        assert!(session.detach_fast_modem().is_none());

        session.attach_fast_modem(Box::new(ScriptedModem::new(BitRateModem::V27ter2400, vec![])));
        session.rx_process(&[0i16; 8]);
        assert!(session.detach_fast_modem().is_some());
    }

    #[test]
    fn training_failed_event_falls_back_a_rate() {
        let mut session = FaxSession::new(true);
        session.modem_bank.begin_negotiation(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.chosen_rate = Some(BitRateModem::V17_14400);
        session.attach_fast_modem(Box::new(ScriptedModem::new(
            BitRateModem::V17_14400,
            vec![ModemEvent::TrainingFailed(BitRateModem::V17_14400)],
        )));

        session.rx_process(&[0i16; 8]);

        assert_eq!(session.chosen_rate, Some(BitRateModem::V17_12000));
    }

    #[test]
    fn carrier_lost_event_applies_any_queued_phase_change() {
        let mut session = FaxSession::new(true);
        session.carrier_up();
        session.queue_phase(Phase::CTx);
        session.attach_fast_modem(Box::new(ScriptedModem::new(
            BitRateModem::V27ter2400,
            vec![ModemEvent::CarrierLost],
        )));

        session.rx_process(&[0i16; 8]);

        assert_eq!(session.phase(), Phase::CTx);
    }

    #[test]
    fn set_sub_address_rejects_overlength() {
        let mut session = FaxSession::new(true);
        assert!(session.set_sub_address(&"x".repeat(21)).is_err());
        assert!(session.set_sub_address("12345").is_ok());
    }

    #[test]
    fn set_header_info_accepts_arbitrary_text() {
        let mut session = FaxSession::new(true);
        session.set_header_info("Acme Corp - Invoices");
        assert_eq!(session.header_info.as_deref(), Some("Acme Corp - Invoices"));
    }

    /// A `PageCodec` recording which files it was pointed at, or failing
    /// on demand to exercise the error path.
    struct MockPageCodec {
        tx_path: Option<String>,
        rx_path: Option<String>,
        fail: bool,
    }

    impl PageCodec for MockPageCodec {
        fn compression(&self) -> crate::frame::Compression {
            crate::frame::Compression::T4_1D
        }
        fn encode_row(&mut self, _row: &[bool]) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn decode_row(&mut self, _data: &[u8]) -> Result<Vec<bool>> {
            Ok(Vec::new())
        }
        fn set_tx_file(&mut self, path: &str) -> Result<()> {
            if self.fail {
                return Err(Error::PageCodec("disk full".to_string()));
            }
            self.tx_path = Some(path.to_string());
            Ok(())
        }
        fn set_rx_file(&mut self, path: &str) -> Result<()> {
            if self.fail {
                return Err(Error::PageCodec("disk full".to_string()));
            }
            self.rx_path = Some(path.to_string());
            Ok(())
        }
    }

    #[test]
    fn set_tx_file_without_a_codec_errors() {
        let mut session = FaxSession::new(true);
        assert!(matches!(session.set_tx_file("/tmp/out.tif"), Err(Error::PageCodec(_))));
    }

    #[test]
    fn set_tx_file_and_set_rx_file_forward_to_the_attached_codec() {
        let mut session = FaxSession::new(true);
        session.set_page_codec(Box::new(MockPageCodec { tx_path: None, rx_path: None, fail: false }));

        assert!(session.set_tx_file("/tmp/tx.tif").is_ok());
        assert!(session.set_rx_file("/tmp/rx.tif").is_ok());
    }

    #[test]
    fn page_codec_failure_propagates_through_set_tx_file() {
        let mut session = FaxSession::new(true);
        session.set_page_codec(Box::new(MockPageCodec { tx_path: None, rx_path: None, fail: true }));

        assert!(matches!(session.set_tx_file("/tmp/tx.tif"), Err(Error::PageCodec(_))));
        assert_eq!(session.completion_code(), Some(CompletionCode::IoError));
        assert_eq!(session.phase(), Phase::Finished);
    }

    /// A `BitStuffer` that passes octets through unchanged, for exercising
    /// `poll_tx_frame`'s burst/cursor bookkeeping without real bit-level
    /// stuffing.
    struct NullStuffer;

    impl BitStuffer for NullStuffer {
        fn stuff(&self, octets: &[u8]) -> Vec<u8> {
            octets.to_vec()
        }
        fn unstuff(&self, wire: &[u8]) -> Option<Vec<u8>> {
            Some(wire.to_vec())
        }
    }

    fn decode_frames_from_wire(wire: &[u8]) -> crate::frame::FrameType {
        let rx = crate::hdlc::HdlcReceiver::new(NullStuffer);
        rx.receive(wire).unwrap().frame_type
    }

    #[test]
    fn poll_tx_frame_returns_none_without_a_bit_stuffer() {
        let mut session = FaxSession::new(false);
        session.set_local_ident("+15550100").unwrap();
        session.begin_answer().unwrap();
        assert!(session.poll_tx_frame().is_none());
    }

    #[test]
    fn poll_tx_hdlc_frame_drains_a_burst_without_a_bit_stuffer() {
        let mut session = FaxSession::new(false);
        session.set_local_ident("+15550100").unwrap();
        session.begin_answer().unwrap();

        let first = session.poll_tx_hdlc_frame().unwrap();
        assert_eq!(first.frame_type, FrameType::Csi);
        let second = session.poll_tx_hdlc_frame().unwrap();
        assert_eq!(second.frame_type, FrameType::Dis);
        assert!(session.poll_tx_hdlc_frame().is_none());
    }

    #[test]
    fn begin_answer_queues_csi_then_dis_and_arms_t2() {
        let mut session = FaxSession::new(false);
        session.set_local_ident("+15550100").unwrap();
        session.attach_bit_stuffer(Box::new(NullStuffer));

        session.begin_answer().unwrap();

        let first = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&first), FrameType::Csi);
        let second = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&second), FrameType::Dis);
        assert!(session.poll_tx_frame().is_none());
    }

    #[test]
    fn begin_answer_is_a_no_op_for_a_caller_session() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.begin_answer().unwrap();
        assert!(session.poll_tx_frame().is_none());
    }

    #[test]
    fn capability_exchange_queues_tsi_dcs_burst() {
        let mut session = FaxSession::new(true);
        session.set_local_ident("+15550100").unwrap();
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.set_supported_rates(&[BitRateModem::V27ter2400, BitRateModem::V29_9600]);

        let remote = Capabilities {
            ready_to_receive: true,
            rate: BitRateModem::V29_9600,
            ..Default::default()
        };
        let frame = HdlcFrame::new(FrameType::Dis, remote.encode());
        session.on_frame(&frame).unwrap();

        let first = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&first), FrameType::Tsi);
        let second = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&second), FrameType::Dcs);
    }

    #[test]
    fn capability_mismatch_queues_dcn_before_finishing() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.set_supported_rates(&[BitRateModem::V27ter2400]);
        let remote = Capabilities {
            ready_to_receive: true,
            rate: BitRateModem::V17_14400,
            ..Default::default()
        };
        let frame = HdlcFrame::new(FrameType::Dis, remote.encode());
        session.on_frame(&frame).unwrap();

        assert_eq!(session.completion_code(), Some(CompletionCode::RemoteCannotReceive));
        let dcn = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&dcn), FrameType::Dcn);
    }

    #[test]
    fn tcf_success_queues_cfr() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.chosen_rate = Some(BitRateModem::V27ter2400);
        session.on_tcf_result(TCF_MIN_VALID_MS).unwrap();

        let cfr = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&cfr), FrameType::Cfr);
    }

    #[test]
    fn tcf_failure_queues_ftt() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.set_supported_rates(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.modem_bank.begin_negotiation(&[BitRateModem::V17_14400, BitRateModem::V17_12000]);
        session.chosen_rate = Some(BitRateModem::V17_14400);
        session.on_tcf_result(TCF_MIN_VALID_MS - 1).unwrap();

        let ftt = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&ftt), FrameType::Ftt);
    }

    #[test]
    fn send_page_boundary_queues_requested_frame_and_arms_t4() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.send_page_boundary(FrameType::Mps).unwrap();

        let mps = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&mps), FrameType::Mps);
        assert_eq!(session.phase(), Phase::BdeTx);
    }

    #[test]
    fn received_page_boundary_queues_mcf_acknowledgment() {
        let mut session = FaxSession::new(false);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        let frame = HdlcFrame::new(FrameType::Mps, vec![]);
        session.on_frame(&frame).unwrap();

        let mcf = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&mcf), FrameType::Mcf);
    }

    #[test]
    fn eop_queues_mcf_before_the_call_finishes() {
        let mut session = FaxSession::new(false);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        let frame = HdlcFrame::new(FrameType::Eop, vec![]);
        session.on_frame(&frame).unwrap();

        assert_eq!(session.phase(), Phase::Finished);
        let mcf = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&mcf), FrameType::Mcf);
    }

    #[test]
    fn release_queues_dcn_before_finishing() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.release();

        assert_eq!(session.completion_code(), Some(CompletionCode::Cancelled));
        let dcn = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&dcn), FrameType::Dcn);
    }

    #[test]
    fn t1_expiry_as_answerer_queues_dcn() {
        let mut session = FaxSession::new(false);
        session.attach_bit_stuffer(Box::new(NullStuffer));

        session.rx_process(&vec![0i16; (crate::timers::SAMPLE_RATE_HZ * 35) as usize]);

        assert_eq!(session.completion_code(), Some(CompletionCode::TimerExpired));
        let dcn = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&dcn), FrameType::Dcn);
    }

    #[test]
    fn page_codec_failure_queues_dcn_before_finishing() {
        let mut session = FaxSession::new(true);
        session.attach_bit_stuffer(Box::new(NullStuffer));
        session.set_page_codec(Box::new(MockPageCodec { tx_path: None, rx_path: None, fail: true }));

        assert!(session.set_tx_file("/tmp/tx.tif").is_err());
        let dcn = session.poll_tx_frame().unwrap();
        assert_eq!(decode_frames_from_wire(&dcn), FrameType::Dcn);
    }
}
