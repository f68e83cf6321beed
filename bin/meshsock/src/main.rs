//! Meshsock node binary.
//!
//! Accepts and dials peers, prints every message received, and broadcasts each
//! line read from stdin to all connected peers.

mod cli;
mod config;
mod logging;

use std::io::{self, BufRead};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr};
use meshsock_endpoint::Endpoint;
use meshsock_net_peers::{Peer, PeerConnectError, PeerReadError, PeerWriteError};
use tracing::{debug, info, warn};

use crate::cli::MeshsockCli;
use crate::config::NodeConfig;

/// Bytes read from each peer per sweep.
const READ_CHUNK: usize = 4096;

fn main() -> Result<()> {
    let cli = MeshsockCli::parse();
    logging::init_logging(&cli.logs)?;

    let mut config = match &cli.node.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    config.apply_cli_args(&cli.node);

    let endpoint = Endpoint::tcp(config.endpoint.clone()).wrap_err("invalid configuration")?;
    subscribe(&endpoint);

    if let Some(listen) = config.listen {
        let bound = endpoint
            .create_server(&listen.ip().to_string(), listen.port())
            .wrap_err_with(|| format!("listening on {listen}"))?;
        info!(%bound, max_peers = endpoint.max_peers(), "accepting peers");
    }

    let timeout = config.connect_timeout_ms.map(Duration::from_millis);
    for addr in &config.connect {
        if let Err(err) = dial(&endpoint, *addr, timeout) {
            warn!(peer = %addr, error = %err, "startup dial failed");
        }
    }

    let lines = spawn_stdin_reader();
    let interval = Duration::from_millis(cli.node.poll_interval_ms);
    run(&endpoint, &lines, interval)
}

fn subscribe(endpoint: &Endpoint) {
    endpoint
        .events()
        .on_peer_connect()
        .listen(|peer: &Arc<Peer>, _| {
            info!(peer = %peer.identity(), direction = %peer.direction(), "peer connected");
            Ok(())
        });
    endpoint
        .events()
        .on_peer_disconnect()
        .listen(|peer: &Arc<Peer>, _| {
            info!(peer = %peer.identity(), "peer disconnected");
            Ok(())
        });
}

fn dial(
    endpoint: &Endpoint,
    addr: SocketAddrV4,
    timeout: Option<Duration>,
) -> Result<Arc<Peer>, PeerConnectError> {
    let ip = addr.ip().to_string();
    match timeout {
        Some(timeout) => endpoint.connect_with_timeout(&ip, addr.port(), timeout),
        None => endpoint.connect(&ip, addr.port()),
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run(endpoint: &Endpoint, lines: &Receiver<String>, interval: Duration) -> Result<()> {
    let mut stdin_open = true;
    loop {
        if endpoint.is_listening() {
            let mut on_accept_failure = |attempt: usize, err: PeerConnectError| {
                warn!(attempt, error = %err, "rejected inbound peer");
            };
            endpoint.listen(None, Some(&mut on_accept_failure))?;
        }

        let mut on_read_failure = |peer: &Arc<Peer>, err: PeerReadError| {
            warn!(peer = %peer.identity(), error = %err, "dropping peer after read failure");
            if let Err(err) = peer.disconnect(true) {
                warn!(peer = %peer.identity(), error = %err, "disconnect failed");
            }
        };
        let messages = endpoint
            .peers()
            .read_all(READ_CHUNK, Some(&mut on_read_failure))?;
        for message in &messages {
            println!(
                "{}> {}",
                message.peer().identity(),
                String::from_utf8_lossy(message.message())
            );
        }

        while stdin_open {
            match lines.try_recv() {
                Ok(line) => {
                    let mut on_write_failure = |peer: &Arc<Peer>, err: PeerWriteError| {
                        warn!(
                            peer = %peer.identity(),
                            error = %err,
                            "dropping peer after write failure"
                        );
                        if let Err(err) = peer.disconnect(true) {
                            warn!(peer = %peer.identity(), error = %err, "disconnect failed");
                        }
                    };
                    let sent = endpoint
                        .peers()
                        .broadcast(line.as_bytes(), Some(&mut on_write_failure))?;
                    debug!(sent, "broadcast line");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("stdin closed; still relaying inbound messages");
                    stdin_open = false;
                }
            }
        }

        thread::sleep(interval);
    }
}
