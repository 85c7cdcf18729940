//! Client that sends messages to the echo server and prints the replies.
//!
//! Run the server first:
//! - cargo run -p jetnet --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p jetnet --example client -- 127.0.0.1:7777
//! - cargo run -p jetnet --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    time::{Duration, Instant},
};

use jetnet::{Config, Event, Host, Packet};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string()).parse()?;
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    let interval_ms: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(300);

    let mut host = Host::bind_with_config("127.0.0.1:0", 1, 0, 0, Config::default())?;
    let local = host.local_addr()?;
    let server = host.connect(server_addr, 2)?;
    println!("jetnet client {} connecting to {}", local, server_addr);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match host.service(100) {
            Event::Connected(_) => break,
            Event::Disconnected(_) => return Err("connection refused or timed out".into()),
            _ if Instant::now() > deadline => return Err("no answer from server".into()),
            _ => {}
        }
    }
    println!("[connect] round trip {}ms", host.peer(server)?.round_trip_time());

    for i in 0..count {
        let message = format!("hello {} from {}", i, local);
        host.send(server, (i % 2) as u8, Packet::reliable(message.as_str()))?;

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(interval_ms) {
            match host.service(10) {
                Event::Received { channel_id, packet, .. } => {
                    println!("[reply] channel={} payload=\"{}\"", channel_id, String::from_utf8_lossy(packet.payload()));
                }
                Event::Disconnected(_) => {
                    println!("[disconnect]");
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    host.disconnect(server)?;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        if let Event::Disconnected(_) = host.service(100) {
            break;
        }
    }
    println!("done");
    Ok(())
}
