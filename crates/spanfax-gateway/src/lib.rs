// SPDX-License-Identifier: Apache-2.0 OR MIT

//! T.38 gateway: bridges a PSTN-side `spanfax::FaxSession` to an IP side
//! speaking the T.38 Internet Facsimile Protocol, per §4.4.
//!
//! Ships as both this library (`GatewayConfig`, `Translator`,
//! `TranslatorError`) and the `spanfax-gateway` CLI binary.

pub mod config;
pub mod translator;

pub use config::{ConfigError, GatewayConfig};
pub use translator::{Indicator, IfpCodec, IfpPacket, NativeIfpCodec, Translator, TranslatorError};
