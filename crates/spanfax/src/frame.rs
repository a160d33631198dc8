// SPDX-License-Identifier: Apache-2.0 OR MIT

//! T.30 control frame types: frame-type codes, 20-digit identifier fields,
//! and the DIS/DTC/DCS capability bit layout (§4.1, §6).
//!
//! Encode/decode pairs here follow the same shape as a wire-message
//! codec elsewhere in this codebase: fixed-layout structs with
//! `encode`/`decode` methods that bounds-check the input slice before
//! slicing it, returning `None`/`Err` on anything short rather than
//! panicking.

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// DIS/DTC/DCS octet 2 capability bits (§4.1 bit layout table).
    struct Octet2: u8 {
        const T38_CAPABLE = 1 << 0;
        const V8_CAPABLE  = 1 << 1;
    }
}

bitflags::bitflags! {
    /// DIS/DTC/DCS octet 3 capability bits (§4.1 bit layout table). The
    /// 4-bit modem-rate field (bits 2..5) is handled separately by
    /// [`BitRateModem::bits`]/[`BitRateModem::from_bits`].
    struct Octet3: u8 {
        const READY_TO_RECEIVE  = 1 << 0;
        const FINE_RESOLUTION   = 1 << 5;
        const TWO_D_CAPABLE     = 1 << 6;
        const READY_TO_TRANSMIT = 1 << 7;
    }
}

bitflags::bitflags! {
    /// DIS/DTC/DCS octet 5 extension bits this crate models (§4.1).
    struct Octet5: u8 {
        const ECM_CAPABLE  = 1 << 0;
        const SUPER_FINE   = 1 << 1;
    }
}

/// Frame Control Field (FCF) octet identifying a T.30 control frame's type.
///
/// This crate's state machine only needs frame types to be mutually
/// distinct and stable across encode/decode; exhaustive bit-for-bit
/// parity with every edition of the ITU-T T.30 FCF table is not a goal
/// (the real DSP/HDLC stack this crate's wire layer plugs into is out of
/// scope per §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Digital Identification Signal (capabilities on answer).
    Dis,
    /// Called Subscriber Identification.
    Csi,
    /// Non-Standard Facilities.
    Nsf,
    /// Confirmation To Receive.
    Cfr,
    /// Failure To Train.
    Ftt,
    /// Message Confirmation.
    Mcf,
    /// Retrain Positive.
    Rtp,
    /// Retrain Negative.
    Rtn,
    /// Digital Command Signal (sender's chosen parameters).
    Dcs,
    /// Transmitting Subscriber Identification.
    Tsi,
    /// Calling Subscriber Identification (on poll).
    Cig,
    /// Sub-address.
    Sub,
    /// Selective polling address.
    Sep,
    /// Password.
    Pwd,
    /// Sub-address Identification (sender's poll identifier).
    Sid,
    /// Digital Transmit Command (capabilities on poll).
    Dtc,
    /// Multi-Page Signal (more pages follow).
    Mps,
    /// End Of Message (renegotiate for next document).
    Eom,
    /// End Of Procedure (last page).
    Eop,
    /// Disconnect.
    Dcn,
    /// Terminate call (non-standard disconnect).
    Xcn,
    /// Partial Page Request (ECM).
    Ppr,
    /// Partial Page Signal (ECM).
    Pps,
    /// End Of Retransmission (ECM).
    Eor,
    /// Receive Ready (ECM post-message response).
    Rr,
    /// Receive Not Ready (ECM post-message response).
    Rnr,
}

impl FrameType {
    const ALL: [FrameType; 26] = [
        Self::Dis, Self::Csi, Self::Nsf, Self::Cfr, Self::Ftt, Self::Mcf, Self::Rtp, Self::Rtn,
        Self::Dcs, Self::Tsi, Self::Cig, Self::Sub, Self::Sep, Self::Pwd, Self::Sid, Self::Dtc,
        Self::Mps, Self::Eom, Self::Eop, Self::Dcn, Self::Xcn, Self::Ppr, Self::Pps, Self::Eor,
        Self::Rr, Self::Rnr,
    ];

    /// The wire octet for this frame type (the FCF byte following the
    /// address/control pair in an HDLC frame, see §4.3).
    #[must_use]
    pub const fn fcf(self) -> u8 {
        match self {
            Self::Dis => 0x01,
            Self::Csi => 0x02,
            Self::Nsf => 0x03,
            Self::Cfr => 0x04,
            Self::Ftt => 0x05,
            Self::Mcf => 0x06,
            Self::Rtp => 0x07,
            Self::Rtn => 0x08,
            Self::Dcs => 0x09,
            Self::Tsi => 0x0A,
            Self::Cig => 0x0B,
            Self::Sub => 0x0C,
            Self::Sep => 0x0D,
            Self::Pwd => 0x0E,
            Self::Sid => 0x0F,
            Self::Dtc => 0x10,
            Self::Mps => 0x11,
            Self::Eom => 0x12,
            Self::Eop => 0x13,
            Self::Dcn => 0x14,
            Self::Xcn => 0x15,
            Self::Ppr => 0x16,
            Self::Pps => 0x17,
            Self::Eor => 0x18,
            Self::Rr => 0x19,
            Self::Rnr => 0x1A,
        }
    }

    /// Decode an FCF octet back to its `FrameType`, if recognized.
    #[must_use]
    pub fn from_fcf(fcf: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.fcf() == fcf)
    }

    /// Short name, used in log messages and `Error::ProtocolViolation`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dis => "DIS", Self::Csi => "CSI", Self::Nsf => "NSF", Self::Cfr => "CFR",
            Self::Ftt => "FTT", Self::Mcf => "MCF", Self::Rtp => "RTP", Self::Rtn => "RTN",
            Self::Dcs => "DCS", Self::Tsi => "TSI", Self::Cig => "CIG", Self::Sub => "SUB",
            Self::Sep => "SEP", Self::Pwd => "PWD", Self::Sid => "SID", Self::Dtc => "DTC",
            Self::Mps => "MPS", Self::Eom => "EOM", Self::Eop => "EOP", Self::Dcn => "DCN",
            Self::Xcn => "XCN", Self::Ppr => "PPR", Self::Pps => "PPS", Self::Eor => "EOR",
            Self::Rr => "RR", Self::Rnr => "RNR",
        }
    }

    /// Final-in-sequence: the sender will not transmit another control
    /// frame before the receiver answers (§3.3).
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Csi | Self::Tsi | Self::Cig | Self::Nsf)
    }
}

/// Width of a T.30 20-octet identifier field (CSI/TSI/CIG/SUB/SEP/PWD/SID).
pub const IDENT_FIELD_LEN: usize = 20;

/// Encode `ident` (at most 20 ASCII characters) into a 20-octet field:
/// right-aligned, space-padded, stored in reverse byte order on the wire.
pub fn encode_ident(ident: &str) -> Result<[u8; IDENT_FIELD_LEN]> {
    if !ident.is_ascii() || ident.len() > IDENT_FIELD_LEN {
        return Err(Error::InvalidIdent(ident.to_string()));
    }

    let mut padded = [b' '; IDENT_FIELD_LEN];
    let start = IDENT_FIELD_LEN - ident.len();
    padded[start..].copy_from_slice(ident.as_bytes());
    padded.reverse();
    Ok(padded)
}

/// Decode a 20-octet identifier field back to its original string, with
/// trailing (i.e. leading, pre-reversal) spaces stripped.
#[must_use]
pub fn decode_ident(field: &[u8; IDENT_FIELD_LEN]) -> String {
    let mut reversed = *field;
    reversed.reverse();
    String::from_utf8_lossy(&reversed).trim_end().to_string()
}

/// The three fast-modem families, per §2 and §9 (a closed sum type
/// replacing the source's function-pointer dispatch table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemFamily {
    /// 2400/4800 bit/s differential QAM.
    V27ter,
    /// 7200/9600 bit/s QAM.
    V29,
    /// 7200-14400 bit/s trellis-coded QAM.
    V17,
}

/// A negotiated (modem family, bit rate) pair, encoded as the 4-bit field
/// in DIS/DTC/DCS octet 3 (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitRateModem {
    V27ter2400,
    V27ter4800,
    V29_7200,
    V29_9600,
    V17_7200,
    V17_9600,
    V17_12000,
    V17_14400,
}

impl BitRateModem {
    /// The fallback order a caller walks, fastest first (§4.1).
    pub const FALLBACK_ORDER: [BitRateModem; 8] = [
        Self::V17_14400,
        Self::V17_12000,
        Self::V17_9600,
        Self::V29_9600,
        Self::V17_7200,
        Self::V29_7200,
        Self::V27ter4800,
        Self::V27ter2400,
    ];

    /// Bit rate in bits per second.
    #[must_use]
    pub const fn bit_rate(self) -> u32 {
        match self {
            Self::V27ter2400 => 2400,
            Self::V27ter4800 => 4800,
            Self::V29_7200 | Self::V17_7200 => 7200,
            Self::V29_9600 | Self::V17_9600 => 9600,
            Self::V17_12000 => 12000,
            Self::V17_14400 => 14400,
        }
    }

    /// Modem family this rate belongs to.
    #[must_use]
    pub const fn family(self) -> ModemFamily {
        match self {
            Self::V27ter2400 | Self::V27ter4800 => ModemFamily::V27ter,
            Self::V29_7200 | Self::V29_9600 => ModemFamily::V29,
            Self::V17_7200 | Self::V17_9600 | Self::V17_12000 | Self::V17_14400 => {
                ModemFamily::V17
            }
        }
    }

    /// Encode to the 4-bit field in DIS/DTC/DCS octet 3 (§4.1 table).
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::V27ter2400 => 0b0000,
            Self::V27ter4800 => 0b0100,
            Self::V29_9600 => 0b1000,
            Self::V29_7200 => 0b1100,
            Self::V17_14400 => 0b0010,
            Self::V17_12000 => 0b1010,
            Self::V17_9600 => 0b0110,
            Self::V17_7200 => 0b1110,
        }
    }

    /// Decode the 4-bit field back to a rate/family pair.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::FALLBACK_ORDER.iter().copied().find(|m| m.bits() == bits & 0b1111)
    }

    /// The next slower entry in the fallback sequence, if any (§4.1,
    /// §8 "Fallback exhaustion").
    #[must_use]
    pub fn fall_back(self) -> Option<Self> {
        let idx = Self::FALLBACK_ORDER.iter().position(|&m| m == self)?;
        Self::FALLBACK_ORDER.get(idx + 1).copied()
    }
}

/// Resolution class, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionClass {
    Standard,
    Fine,
    SuperFine,
}

/// Minimum-scan-line-time table: for each resolution class, the bit count
/// implied by each of the 8 three-bit codes in DIS/DTC/DCS octet 4 (§8
/// "Minimum scan-line time" boundary behavior). Standard-resolution values
/// are fixed by this table; fine and super-fine scale by 2x and 4x
/// respectively, since twice (resp. four times) as many scan lines must
/// fit in the same minimum time. Code 7 is a distinct terminal case (no
/// minimum scan time at all) and stays 0 at every resolution.
const MIN_SCAN_ROW_BITS_STANDARD: [u32; 8] = [0, 144, 36, 72, 288, 48, 96, 0];

impl ResolutionClass {
    /// Minimum scan-line bit count for the 3-bit `code` (0..=7) in this
    /// resolution class.
    #[must_use]
    pub fn min_scan_row_bits(self, code: u8) -> u32 {
        let base = MIN_SCAN_ROW_BITS_STANDARD[(code & 0b111) as usize];
        match self {
            Self::Standard => base,
            Self::Fine => base * 2,
            Self::SuperFine => base * 4,
        }
    }
}

/// Image scan-line width in pixels, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageWidth {
    W1728,
    W2048,
    W2432,
    W3456,
    W4096,
    W4864,
}

impl ImageWidth {
    /// Width in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            Self::W1728 => 1728,
            Self::W2048 => 2048,
            Self::W2432 => 2432,
            Self::W3456 => 3456,
            Self::W4096 => 4096,
            Self::W4864 => 4864,
        }
    }
}

/// Page compression scheme, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    T4_1D,
    T4_2D,
    T6,
}

/// The negotiable capability set carried by DIS, DTC, and DCS (§4.1).
///
/// DIS/DTC advertise what a party *can* do; DCS states what the sender
/// has *chosen*. The same struct models all three; `Capabilities` callers
/// interpret the fields according to which frame type they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub t38_capable: bool,
    pub v8_capable: bool,
    pub ready_to_receive: bool,
    pub ready_to_transmit: bool,
    pub rate: BitRateModem,
    pub resolution: ResolutionClass,
    pub two_d_capable: bool,
    pub width: ImageWidth,
    pub min_scan_time_code: u8,
    pub ecm_capable: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            t38_capable: false,
            v8_capable: false,
            ready_to_receive: true,
            ready_to_transmit: true,
            rate: BitRateModem::V27ter2400,
            resolution: ResolutionClass::Standard,
            two_d_capable: false,
            width: ImageWidth::W1728,
            min_scan_time_code: 0,
            ecm_capable: false,
        }
    }
}

impl Capabilities {
    /// Encode to the DIS/DTC/DCS octet sequence (octets 2..4, following
    /// the FCF octet), per §4.1's bit layout table. Octet 4's extend bit
    /// (bit 8) is set to carry an ECM-capability octet 5, matching real
    /// DIS frames which always extend at least one octet past the
    /// minimum-scan-time octet.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut octet2 = Octet2::empty();
        octet2.set(Octet2::T38_CAPABLE, self.t38_capable);
        octet2.set(Octet2::V8_CAPABLE, self.v8_capable);

        let mut octet3 = Octet3::empty();
        octet3.set(Octet3::READY_TO_RECEIVE, self.ready_to_receive);
        octet3.set(Octet3::FINE_RESOLUTION, self.resolution != ResolutionClass::Standard);
        octet3.set(Octet3::TWO_D_CAPABLE, self.two_d_capable);
        octet3.set(Octet3::READY_TO_TRANSMIT, self.ready_to_transmit);
        let octet3 = octet3.bits() | (self.rate.bits() << 1);

        let mut octet4 = match self.width {
            ImageWidth::W1728 => 0b00,
            ImageWidth::W2048 => 0b01,
            ImageWidth::W2432 => 0b10,
            ImageWidth::W3456 | ImageWidth::W4096 | ImageWidth::W4864 => 0b11,
        };
        octet4 |= (self.min_scan_time_code & 0b111) << 4;
        octet4 |= 1 << 7; // extend bit: octet 5 follows

        let mut octet5 = Octet5::empty();
        octet5.set(Octet5::ECM_CAPABLE, self.ecm_capable);
        octet5.set(Octet5::SUPER_FINE, self.resolution == ResolutionClass::SuperFine);
        // No further extension.

        vec![octet2.bits(), octet3, octet4, octet5.bits()]
    }

    /// Decode a capability octet sequence (everything after the FCF
    /// octet). Extension octets beyond what this crate models are walked
    /// (via each octet's bit-8 "another follows" flag) and ignored,
    /// rather than rejected, so a peer advertising unmodeled facilities
    /// still negotiates on the fields we do understand.
    pub fn decode(octets: &[u8]) -> Result<Self> {
        if octets.len() < 3 {
            return Err(Error::MalformedFrame("capability frame shorter than 3 octets"));
        }

        let octet2 = Octet2::from_bits_truncate(octets[0]);
        let octet3_raw = octets[1];
        let octet3 = Octet3::from_bits_truncate(octet3_raw);
        let octet4 = octets[2];

        let rate = BitRateModem::from_bits((octet3_raw >> 1) & 0b1111)
            .ok_or(Error::MalformedFrame("unrecognized modem-family field"))?;

        let fine = octet3.contains(Octet3::FINE_RESOLUTION);
        let mut super_fine = false;

        let width = match octet4 & 0b11 {
            0b00 => ImageWidth::W1728,
            0b01 => ImageWidth::W2048,
            0b10 => ImageWidth::W2432,
            _ => ImageWidth::W3456,
        };
        let min_scan_time_code = (octet4 >> 4) & 0b111;

        let mut ecm_capable = false;
        if octet4 & (1 << 7) != 0 {
            if let Some(&octet5_raw) = octets.get(3) {
                let octet5 = Octet5::from_bits_truncate(octet5_raw);
                ecm_capable = octet5.contains(Octet5::ECM_CAPABLE);
                super_fine = octet5.contains(Octet5::SUPER_FINE);
            }
        }

        let resolution = if super_fine {
            ResolutionClass::SuperFine
        } else if fine {
            ResolutionClass::Fine
        } else {
            ResolutionClass::Standard
        };

        Ok(Self {
            t38_capable: octet2.contains(Octet2::T38_CAPABLE),
            v8_capable: octet2.contains(Octet2::V8_CAPABLE),
            ready_to_receive: octet3.contains(Octet3::READY_TO_RECEIVE),
            ready_to_transmit: octet3.contains(Octet3::READY_TO_TRANSMIT),
            rate,
            resolution,
            two_d_capable: octet3.contains(Octet3::TWO_D_CAPABLE),
            width,
            min_scan_time_code,
            ecm_capable,
        })
    }

    /// Intersect local capability with a remote advertisement, choosing
    /// the fastest mutually-supported rate per §4.1's fallback order.
    /// Returns `None` if no rate is shared (a capability mismatch, §7).
    #[must_use]
    pub fn negotiate(local: &Capabilities, remote: &Capabilities, local_rates: &[BitRateModem]) -> Option<BitRateModem> {
        if !(local.ready_to_transmit && remote.ready_to_receive) {
            return None;
        }
        BitRateModem::FALLBACK_ORDER.into_iter().find(|candidate| {
            candidate.family() == remote.rate.family()
                && candidate.bit_rate() <= remote.rate.bit_rate()
                && local_rates.contains(candidate)
        })
    }
}
