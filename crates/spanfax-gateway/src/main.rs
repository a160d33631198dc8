// SPDX-License-Identifier: Apache-2.0 OR MIT

//! T.38 Gateway CLI
//!
//! Bridges a PSTN-facing `spanfax::FaxSession` to an IP-facing UDP socket
//! carrying T.38 IFP packets (encoded with `NativeIfpCodec`).
//!
//! # Usage
//!
//! ```bash
//! # Answer a call, bridging to a peer gateway over UDP
//! spanfax-gateway --listen 0.0.0.0:4000 --peer 10.0.0.5:4000 --answerer
//!
//! # Using a configuration file
//! spanfax-gateway --config gateway.toml --listen 0.0.0.0:4000 --peer 10.0.0.5:4000
//! ```

use clap::{Parser, Subcommand};
use spanfax::hdlc::HdlcFrame;
use spanfax::FaxSession;
use spanfax_gateway::{GatewayConfig, IfpCodec, IfpPacket, Indicator, NativeIfpCodec, Translator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

/// spanfax T.38 gateway
#[derive(Parser, Debug)]
#[command(name = "spanfax-gateway")]
#[command(about = "spanfax T.38 gateway - bridges PSTN audio to IFP packets over IP")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local UDP address to receive IFP packets on
    #[arg(long, default_value = "0.0.0.0:4000")]
    listen: SocketAddr,

    /// Peer gateway's UDP address
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// Act as the call answerer rather than the caller
    #[arg(long)]
    answerer: bool,

    /// Local station identifier (TSI/CSI), at most 20 ASCII characters
    #[arg(long, default_value = "")]
    ident: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an example configuration file
    GenConfig {
        #[arg(short, long, default_value = "gateway.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    let peer = args.peer.ok_or("--peer is required outside of subcommands")?;

    println!("spanfax T.38 gateway v{}", env!("CARGO_PKG_VERSION"));
    println!("============================");
    println!("listening on {}, bridging to {}", args.listen, peer);
    println!();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(run_gateway(config, args.listen, peer, args.answerer, &args.ident))
        .await
}

fn build_config(args: &Args) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::default();
    let toml = toml::to_string_pretty(&config)?;
    std::fs::write(&output, toml)?;
    println!("wrote example configuration to {}", output.display());
    Ok(())
}

fn cmd_validate(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_file(&config)?;
    println!("configuration valid: {}", config.name);
    Ok(())
}

async fn run_gateway(
    config: GatewayConfig,
    listen: SocketAddr,
    peer: SocketAddr,
    answerer: bool,
    ident: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let socket = Arc::new(UdpSocket::bind(listen).await?);

    let session = Arc::new(Mutex::new(FaxSession::new(!answerer)));
    if !ident.is_empty() {
        session.lock().unwrap().set_local_ident(ident)?;
    }

    let translator = Arc::new(Mutex::new(Translator::new()));
    {
        let mut t = translator.lock().unwrap();
        t.set_t38_version(config.t38_version);
        t.set_transmit_on_idle(config.transmit_on_idle);
        t.set_ecm_capability(config.ecm_capability);
        t.set_supported_modems(&config.supported_rates());

        let tx_socket = Arc::clone(&socket);
        t.set_tx_packet_handler(Box::new(move |packet, seq| {
            let bytes = NativeIfpCodec.encode(packet, seq);
            let socket = Arc::clone(&tx_socket);
            tokio::task::spawn_local(async move {
                let _ = socket.send_to(&bytes, peer).await;
            });
        }));
    }

    {
        let session = Arc::clone(&session);
        let translator = Arc::clone(&translator);
        tokio::task::spawn_local(async move {
            loop {
                let frame = {
                    let mut session = session.lock().unwrap();
                    if session.phase() == spanfax::Phase::Finished {
                        break;
                    }
                    session.poll_tx_hdlc_frame()
                };
                match frame {
                    Some(frame) => {
                        let payload = frame.encode();
                        if let Err(err) = translator.lock().unwrap().send(IfpPacket::HdlcData(payload)) {
                            tracing::warn!("failed to send outgoing IFP packet: {}", err);
                        }
                    }
                    None => tokio::time::sleep(Duration::from_millis(20)).await,
                }
            }
        });
    }

    let mut buf = [0u8; 2048];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        if from != peer {
            tracing::warn!("dropping datagram from unexpected peer {}", from);
            continue;
        }

        let (packet, seq) = match NativeIfpCodec.decode(&buf[..len]) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("malformed IFP datagram: {}", err);
                continue;
            }
        };

        let delivered = translator.lock().unwrap().rx_packet(packet, seq);
        let Some(packet) = delivered else {
            continue;
        };

        match &packet {
            IfpPacket::HdlcData(payload) => match HdlcFrame::decode(payload) {
                Ok(frame) => {
                    if let Err(err) = session.lock().unwrap().on_frame(&frame) {
                        tracing::warn!("session rejected frame: {}", err);
                    }
                }
                Err(err) => tracing::warn!("malformed HDLC payload in IFP data: {}", err),
            },
            IfpPacket::Indicator(Indicator::NoSignal) => {
                session.lock().unwrap().carrier_down();
            }
            IfpPacket::Indicator(_) => {
                session.lock().unwrap().carrier_up();
            }
            IfpPacket::HdlcSigEnd => {
                tracing::debug!("HDLC signal end received");
            }
            IfpPacket::T4NonEcmData(payload) => {
                tracing::debug!("non-ECM T.4 data received ({} octets)", payload.len());
            }
            IfpPacket::T4NonEcmSigEnd => {
                tracing::debug!("non-ECM T.4 signal end received");
            }
        }

        if session.lock().unwrap().phase() == spanfax::Phase::Finished {
            break;
        }
    }

    Ok(())
}
