// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type for the spanfax crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use spanfax::{Error, Result};
//!
//! fn set_ident(ident: &str) -> Result<()> {
//!     if ident.len() > 20 {
//!         return Err(Error::InvalidIdent(ident.to_string()));
//!     }
//!     Ok(())
//! }
//! ```

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a fax session.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Local identifier string exceeds the 20-character T.30 field width.
    InvalidIdent(String),
    /// Sub-address string exceeds the 20-character T.30 field width.
    InvalidSubAddress(String),
    /// Supported-modem set is empty; the session could never negotiate.
    NoSupportedModems,

    // ========================================================================
    // Negotiation errors
    // ========================================================================
    /// Local and remote capability sets do not intersect.
    CapabilityMismatch,
    /// The fallback rate/modem sequence was exhausted without success.
    FallbackExhausted,
    /// A DIS/DCS frame failed to decode (too short, bad bit layout).
    MalformedFrame(&'static str),

    // ========================================================================
    // Protocol errors
    // ========================================================================
    /// A frame arrived that the current state does not accept.
    ProtocolViolation { state: &'static str, frame: &'static str },
    /// One of T0..T5 expired without the expected response.
    TimerExpired(&'static str),
    /// Training (TCF) failed and no further fallback rate exists.
    TrainingFailed,
    /// Remote party sent DCN or an equivalent terminal frame.
    RemoteDisconnect,

    // ========================================================================
    // Collaborator errors
    // ========================================================================
    /// The page codec collaborator reported a read/write failure.
    PageCodec(String),

    // ========================================================================
    // Gateway / IFP errors
    // ========================================================================
    /// An IFP packet was too short or had an unrecognized type tag.
    MalformedIfpPacket,
    /// Too many consecutive IFP data packets were missing.
    IfpDataGap { first_missing_seq: u16 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdent(s) => write!(f, "identifier exceeds 20 characters: {s:?}"),
            Self::InvalidSubAddress(s) => write!(f, "sub-address exceeds 20 characters: {s:?}"),
            Self::NoSupportedModems => write!(f, "no fast modems are enabled for this session"),
            Self::CapabilityMismatch => write!(f, "local and remote capability sets do not intersect"),
            Self::FallbackExhausted => write!(f, "rate/modem fallback sequence exhausted"),
            Self::MalformedFrame(why) => write!(f, "malformed control frame: {why}"),
            Self::ProtocolViolation { state, frame } => {
                write!(f, "unexpected frame {frame} in state {state}")
            }
            Self::TimerExpired(which) => write!(f, "timer {which} expired"),
            Self::TrainingFailed => write!(f, "training failed with no further fallback"),
            Self::RemoteDisconnect => write!(f, "remote party disconnected"),
            Self::PageCodec(msg) => write!(f, "page codec error: {msg}"),
            Self::MalformedIfpPacket => write!(f, "malformed IFP packet"),
            Self::IfpDataGap { first_missing_seq } => {
                write!(f, "IFP data gap starting at sequence {first_missing_seq}")
            }
        }
    }
}

impl std::error::Error for Error {}
