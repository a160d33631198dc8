// SPDX-License-Identifier: Apache-2.0 OR MIT

//! T.38 IFP translation: the typed packet taxonomy and the bidirectional
//! bridge between it and the PSTN-side audio/HDLC world, per §4.4.
//!
//! IFP is assumed to run over an unreliable transport: indicators and
//! sig-end packets are sent redundantly and deduplicated by sequence
//! number on receive, the same shape as deduplicating retransmitted
//! heartbeats in a reliable-delivery protocol.

use spanfax::frame::BitRateModem;
use std::collections::VecDeque;
use thiserror::Error;

/// Errors a [`Translator`] can report back to its caller.
#[derive(Debug, Error)]
pub enum TranslatorError {
    #[error("no transmit handler registered")]
    NoTransmitHandler,

    #[error("malformed IFP packet: {0}")]
    Malformed(&'static str),
}

/// The indicator sub-taxonomy: tone/carrier state changes on the audio
/// side that have no payload of their own (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    NoSignal,
    Cng,
    Ced,
    V21Preamble,
    Training(BitRateModem),
}

/// One T.38 Internet Facsimile Protocol packet (§4.4 "IFP packet
/// taxonomy"). Serialization is out of scope for the procedure engine
/// itself (§1 Non-goals); this is the typed in-memory record the
/// gateway's own compact codec and `Translator` operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfpPacket {
    Indicator(Indicator),
    HdlcData(Vec<u8>),
    HdlcSigEnd,
    T4NonEcmData(Vec<u8>),
    T4NonEcmSigEnd,
}

impl IfpPacket {
    /// Indicators and sig-end packets are retransmitted for loss
    /// robustness; data packets are sent exactly once (§4.4
    /// "Reliability and ordering").
    #[must_use]
    pub fn is_repeated(&self) -> bool {
        !matches!(self, IfpPacket::HdlcData(_) | IfpPacket::T4NonEcmData(_))
    }
}

/// How many of the last sequence numbers a dedup window remembers, per
/// stream. Sized to the largest configured repeat count a caller is
/// likely to use.
const DEDUP_WINDOW: usize = 16;

type TxHandler = Box<dyn FnMut(&IfpPacket, u16)>;

/// Bridges one T.30 session's PSTN side to its T.38 IP side.
///
/// `!Sync` by convention along with [`spanfax::FaxSession`] (§5): one
/// instance drives one call, from one thread.
pub struct Translator {
    t38_version: u8,
    transmit_on_idle: bool,
    ecm_capability: bool,
    supported_rates: Vec<BitRateModem>,
    indicator_repeat_count: u8,
    data_end_repeat_count: u8,
    next_tx_seq: u16,
    tx_handler: Option<TxHandler>,
    seen_seqs: VecDeque<u16>,
    expected_data_seq: Option<u16>,
    missing_data: bool,
}

impl Translator {
    /// A translator with conservative defaults (§6): ECM off,
    /// transmit-on-idle off, T.38 version 1, repeat counts of 3, every
    /// rate supported.
    #[must_use]
    pub fn new() -> Self {
        Self {
            t38_version: 1,
            transmit_on_idle: false,
            ecm_capability: false,
            supported_rates: BitRateModem::FALLBACK_ORDER.to_vec(),
            indicator_repeat_count: 3,
            data_end_repeat_count: 3,
            next_tx_seq: 0,
            tx_handler: None,
            seen_seqs: VecDeque::with_capacity(DEDUP_WINDOW),
            expected_data_seq: None,
            missing_data: false,
        }
    }

    pub fn set_tx_packet_handler(&mut self, handler: TxHandler) {
        self.tx_handler = Some(handler);
    }

    pub fn set_t38_version(&mut self, version: u8) {
        self.t38_version = version;
    }

    #[must_use]
    pub fn t38_version(&self) -> u8 {
        self.t38_version
    }

    pub fn set_transmit_on_idle(&mut self, enabled: bool) {
        self.transmit_on_idle = enabled;
    }

    pub fn set_ecm_capability(&mut self, enabled: bool) {
        self.ecm_capability = enabled;
    }

    #[must_use]
    pub fn ecm_capability(&self) -> bool {
        self.ecm_capability
    }

    pub fn set_supported_modems(&mut self, rates: &[BitRateModem]) {
        self.supported_rates = rates.to_vec();
    }

    /// Whether a gap was detected in the current data burst (§4.4 "Gap
    /// handling"). Cleared by the next sig-end.
    #[must_use]
    pub fn missing_data(&self) -> bool {
        self.missing_data
    }

    /// Audio → IFP: send one packet, repeating it per §4.4 if it's an
    /// indicator or sig-end packet. Every repeat of the same logical
    /// event carries the same sequence number, distinguishing "repeat of
    /// event N" from "event N+1".
    pub fn send(&mut self, packet: IfpPacket) -> Result<(), TranslatorError> {
        let repeat_count = if packet.is_repeated() {
            match &packet {
                IfpPacket::HdlcSigEnd | IfpPacket::T4NonEcmSigEnd => self.data_end_repeat_count,
                _ => self.indicator_repeat_count,
            }
            .max(1)
        } else {
            1
        };

        let seq = self.next_tx_seq;
        self.next_tx_seq = self.next_tx_seq.wrapping_add(1);

        let handler = self.tx_handler.as_mut().ok_or(TranslatorError::NoTransmitHandler)?;
        for _ in 0..repeat_count {
            handler(&packet, seq);
        }
        Ok(())
    }

    /// IFP → audio: deliver one received packet. Duplicate sequence
    /// numbers (retransmitted indicators/sig-ends) are silently dropped;
    /// a gap in a data stream's sequence numbers sets
    /// [`Translator::missing_data`] rather than being treated as loss of
    /// the whole burst (§4.4 "Gap handling").
    ///
    /// Returns `Some(packet)` the first time this sequence number is
    /// seen, `None` for a deduplicated repeat.
    pub fn rx_packet(&mut self, packet: IfpPacket, sequence_number: u16) -> Option<IfpPacket> {
        if self.seen_seqs.contains(&sequence_number) {
            return None;
        }
        if self.seen_seqs.len() == DEDUP_WINDOW {
            self.seen_seqs.pop_front();
        }
        self.seen_seqs.push_back(sequence_number);

        match &packet {
            IfpPacket::T4NonEcmData(_) | IfpPacket::HdlcData(_) => {
                if let Some(expected) = self.expected_data_seq {
                    if sequence_number != expected {
                        self.missing_data = true;
                    }
                }
                self.expected_data_seq = Some(sequence_number.wrapping_add(1));
            }
            IfpPacket::HdlcSigEnd | IfpPacket::T4NonEcmSigEnd => {
                self.expected_data_seq = None;
                self.missing_data = false;
            }
            IfpPacket::Indicator(_) => {}
        }

        Some(packet)
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes [`IfpPacket`]s to and from wire bytes. A production gateway
/// would implement ASN.1 PER per the T.38 recommendation; that encoder is
/// out of scope here (§1 Non-goals) in favor of [`NativeIfpCodec`], a
/// compact tagged format good enough for this crate's own wire traffic.
pub trait IfpCodec {
    fn encode(&self, packet: &IfpPacket, sequence_number: u16) -> Vec<u8>;
    fn decode(&self, data: &[u8]) -> Result<(IfpPacket, u16), TranslatorError>;
}

const TAG_INDICATOR: u8 = 0;
const TAG_HDLC_DATA: u8 = 1;
const TAG_HDLC_SIG_END: u8 = 2;
const TAG_T4_DATA: u8 = 3;
const TAG_T4_SIG_END: u8 = 4;

const IND_NO_SIGNAL: u8 = 0;
const IND_CNG: u8 = 1;
const IND_CED: u8 = 2;
const IND_V21_PREAMBLE: u8 = 3;
const IND_TRAINING: u8 = 4;

/// The compact native [`IfpCodec`] this crate ships (§4.4
/// "canonical wire formats").
pub struct NativeIfpCodec;

impl IfpCodec for NativeIfpCodec {
    fn encode(&self, packet: &IfpPacket, sequence_number: u16) -> Vec<u8> {
        let mut out = Vec::new();
        let seq = sequence_number.to_le_bytes();
        match packet {
            IfpPacket::Indicator(indicator) => {
                out.push(TAG_INDICATOR);
                out.extend(seq);
                match indicator {
                    Indicator::NoSignal => out.push(IND_NO_SIGNAL),
                    Indicator::Cng => out.push(IND_CNG),
                    Indicator::Ced => out.push(IND_CED),
                    Indicator::V21Preamble => out.push(IND_V21_PREAMBLE),
                    Indicator::Training(rate) => {
                        out.push(IND_TRAINING);
                        out.push(rate.bits());
                    }
                }
            }
            IfpPacket::HdlcData(payload) => {
                out.push(TAG_HDLC_DATA);
                out.extend(seq);
                out.extend_from_slice(payload);
            }
            IfpPacket::HdlcSigEnd => {
                out.push(TAG_HDLC_SIG_END);
                out.extend(seq);
            }
            IfpPacket::T4NonEcmData(payload) => {
                out.push(TAG_T4_DATA);
                out.extend(seq);
                out.extend_from_slice(payload);
            }
            IfpPacket::T4NonEcmSigEnd => {
                out.push(TAG_T4_SIG_END);
                out.extend(seq);
            }
        }
        out
    }

    fn decode(&self, data: &[u8]) -> Result<(IfpPacket, u16), TranslatorError> {
        if data.len() < 3 {
            return Err(TranslatorError::Malformed("shorter than tag+sequence"));
        }
        let tag = data[0];
        let sequence_number = u16::from_le_bytes([data[1], data[2]]);
        let rest = &data[3..];

        let packet = match tag {
            TAG_INDICATOR => {
                let &ind_tag = rest.first().ok_or(TranslatorError::Malformed("missing indicator tag"))?;
                let indicator = match ind_tag {
                    IND_NO_SIGNAL => Indicator::NoSignal,
                    IND_CNG => Indicator::Cng,
                    IND_CED => Indicator::Ced,
                    IND_V21_PREAMBLE => Indicator::V21Preamble,
                    IND_TRAINING => {
                        let &bits = rest.get(1).ok_or(TranslatorError::Malformed("missing training rate"))?;
                        let rate = BitRateModem::from_bits(bits)
                            .ok_or(TranslatorError::Malformed("unrecognized training rate"))?;
                        Indicator::Training(rate)
                    }
                    _ => return Err(TranslatorError::Malformed("unrecognized indicator tag")),
                };
                IfpPacket::Indicator(indicator)
            }
            TAG_HDLC_DATA => IfpPacket::HdlcData(rest.to_vec()),
            TAG_HDLC_SIG_END => IfpPacket::HdlcSigEnd,
            TAG_T4_DATA => IfpPacket::T4NonEcmData(rest.to_vec()),
            TAG_T4_SIG_END => IfpPacket::T4NonEcmSigEnd,
            _ => return Err(TranslatorError::Malformed("unrecognized packet tag")),
        };

        Ok((packet, sequence_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn indicator_is_repeated_per_configured_count() {
        let mut translator = Translator::new();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = Rc::clone(&sent);
        translator.set_tx_packet_handler(Box::new(move |packet, seq| {
            sent_clone.borrow_mut().push((packet.clone(), seq));
        }));

        translator.send(IfpPacket::Indicator(Indicator::Cng)).unwrap();
        assert_eq!(sent.borrow().len(), 3);
        assert!(sent.borrow().iter().all(|(_, seq)| *seq == 0));
    }

    #[test]
    fn data_packet_is_sent_exactly_once() {
        let mut translator = Translator::new();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = Rc::clone(&sent);
        translator.set_tx_packet_handler(Box::new(move |packet, seq| {
            sent_clone.borrow_mut().push((packet.clone(), seq));
        }));

        translator.send(IfpPacket::HdlcData(vec![1, 2, 3])).unwrap();
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn send_without_handler_errors() {
        let mut translator = Translator::new();
        assert!(translator.send(IfpPacket::HdlcSigEnd).is_err());
    }

    #[test]
    fn duplicate_sequence_numbers_are_deduplicated_on_receive() {
        let mut translator = Translator::new();
        assert!(translator.rx_packet(IfpPacket::Indicator(Indicator::Ced), 5).is_some());
        assert!(translator.rx_packet(IfpPacket::Indicator(Indicator::Ced), 5).is_none());
    }

    #[test]
    fn sequence_gap_in_data_sets_missing_data_flag() {
        let mut translator = Translator::new();
        translator.rx_packet(IfpPacket::T4NonEcmData(vec![0; 4]), 0);
        assert!(!translator.missing_data());
        translator.rx_packet(IfpPacket::T4NonEcmData(vec![0; 4]), 2);
        assert!(translator.missing_data());
    }

    #[test]
    fn sig_end_clears_the_missing_data_flag() {
        let mut translator = Translator::new();
        translator.rx_packet(IfpPacket::T4NonEcmData(vec![0; 4]), 0);
        translator.rx_packet(IfpPacket::T4NonEcmData(vec![0; 4]), 5);
        assert!(translator.missing_data());
        translator.rx_packet(IfpPacket::T4NonEcmSigEnd, 6);
        assert!(!translator.missing_data());
    }

    #[test]
    fn contiguous_data_sequence_never_flags_missing() {
        let mut translator = Translator::new();
        for seq in 0..10u16 {
            translator.rx_packet(IfpPacket::HdlcData(vec![seq as u8]), seq);
        }
        assert!(!translator.missing_data());
    }

    #[test]
    fn codec_round_trips_hdlc_data() {
        let codec = NativeIfpCodec;
        let packet = IfpPacket::HdlcData(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let encoded = codec.encode(&packet, 42);
        let (decoded, seq) = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(seq, 42);
    }

    #[test]
    fn codec_round_trips_training_indicator() {
        let codec = NativeIfpCodec;
        let packet = IfpPacket::Indicator(Indicator::Training(BitRateModem::V17_14400));
        let encoded = codec.encode(&packet, 7);
        let (decoded, seq) = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(seq, 7);
    }

    #[test]
    fn codec_round_trips_sig_end_packets() {
        let codec = NativeIfpCodec;
        for packet in [IfpPacket::HdlcSigEnd, IfpPacket::T4NonEcmSigEnd] {
            let encoded = codec.encode(&packet, 1);
            let (decoded, _) = codec.decode(&encoded).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn decode_rejects_short_input() {
        let codec = NativeIfpCodec;
        assert!(codec.decode(&[0, 0]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let codec = NativeIfpCodec;
        assert!(codec.decode(&[0xFF, 0, 0]).is_err());
    }
}
