// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Page image encoding and per-call transfer statistics, per §4.4 and §6.
//!
//! T.4/T.6 run-length image coding and TIFF container I/O are external
//! collaborators (§1 Non-goals): this module defines the seam
//! ([`PageCodec`]) a session pulls encoded scan lines through, and the
//! statistics a session accumulates as pages cross that seam.

use crate::error::Result;
use crate::frame::Compression;

/// Converts between raw scan-line bits and a page's on-wire compressed
/// representation. Real T.4/T.6 coding and the TIFF/PDF container format
/// live outside this crate; implementations of this trait are how a
/// caller plugs that in.
pub trait PageCodec {
    /// The compression scheme this codec implements.
    fn compression(&self) -> Compression;

    /// Encode one scan line (one bit per pixel, MSB first) to its
    /// compressed wire representation.
    fn encode_row(&mut self, row: &[bool]) -> Result<Vec<u8>>;

    /// Decode one compressed scan line back to pixel bits.
    fn decode_row(&mut self, data: &[u8]) -> Result<Vec<bool>>;

    /// Open (or create) the file that transmitted pages are read from
    /// (§6 `set_tx_file`). Called before the first `encode_row` of a call.
    fn set_tx_file(&mut self, path: &str) -> Result<()>;

    /// Open (or create) the file that received pages are written to
    /// (§6 `set_rx_file`). Called before the first `decode_row` of a call.
    fn set_rx_file(&mut self, path: &str) -> Result<()>;
}

/// Running statistics for one call, exposed to the application at the
/// end-of-page and end-of-call callbacks (§6 "Application callbacks").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatistics {
    /// Pages successfully transferred this call.
    pub pages_transferred: u32,
    /// Total image octets transferred (post-compression, pre-ECM
    /// framing).
    pub bytes_transferred: u64,
    /// HDLC frames that failed CRC and had to be retransmitted (ECM) or
    /// triggered a retrain (non-ECM).
    pub bad_frames: u32,
    /// Modem retrains performed (successful and failed).
    pub retrains: u32,
    /// Rate fallbacks forced by exhausted retrains.
    pub fallbacks: u32,
    /// ECM partial-page retransmission rounds (PPR cycles).
    pub ecm_retransmit_rounds: u32,
}

impl TransferStatistics {
    /// A fresh, all-zero counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successfully transferred page.
    pub fn record_page(&mut self, octets: u64) {
        self.pages_transferred += 1;
        self.bytes_transferred += octets;
    }

    /// Record one bad (CRC-failed) frame.
    pub fn record_bad_frame(&mut self) {
        self.bad_frames += 1;
    }

    /// Record one modem retrain attempt.
    pub fn record_retrain(&mut self) {
        self.retrains += 1;
    }

    /// Record one forced rate fallback.
    pub fn record_fallback(&mut self) {
        self.fallbacks += 1;
    }

    /// Record one ECM partial-page retransmission round.
    pub fn record_ecm_round(&mut self) {
        self.ecm_retransmit_rounds += 1;
    }
}
