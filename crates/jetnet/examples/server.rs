//! Echo server: sends every packet back to its sender on the same channel.
//!
//! Run:
//! - cargo run -p jetnet --example server
//! - cargo run -p jetnet --example server -- 127.0.0.1:7777
//!
//! Set `RUST_LOG=jetnet_host=debug` to watch connections come and go.

use std::{env, net::SocketAddr};

use jetnet::{Config, Event, Host, Packet};
use tracing_subscriber::EnvFilter;

fn parse_bind_addr() -> Option<SocketAddr> {
    env::args().nth(1).and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Tweak here to demo features quickly
    let config = Config::default();
    // config.use_checksums = true;

    let bind_addr = parse_bind_addr().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 9000)));
    let mut host = Host::bind_with_config(bind_addr, 32, 0, 0, config)?;
    println!("jetnet echo server listening on {}", host.local_addr()?);

    loop {
        match host.service(1000) {
            Event::None => {}
            Event::Connected(peer) => {
                let address = host.peer(peer)?.address();
                println!("[connect] peer={} address={:?}", peer, address);
            }
            Event::Received { peer, channel_id, packet } => {
                println!(
                    "[packet] peer={} channel={} flags={:?} payload=\"{}\"",
                    peer,
                    channel_id,
                    packet.flags(),
                    String::from_utf8_lossy(packet.payload())
                );

                let echo = Packet::new(packet.data().clone(), packet.flags());
                if let Err(e) = host.send(peer, channel_id, echo) {
                    eprintln!("failed to queue echo: {}", e);
                }
            }
            Event::Disconnected(peer) => println!("[disconnect] peer={}", peer),
            Event::Error(kind) => eprintln!("[error] {:?}", kind),
        }
    }
}
