//! TCP ingress: the acceptor and one line reader per client connection.

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use crate::message::parse_line;
use crate::pipeline::FatalError;
use crate::queue::IngressSender;
use crate::stats::{Counter, Gauge, Stats};

/// Accept loop. Bind errors are handled by the caller before spawning; an
/// accept error is reported to the supervisor and ends the loop.
pub fn spawn_acceptor(
    listener: TcpListener,
    ingress: IngressSender,
    stats: Arc<Stats>,
    fatal_tx: Sender<FatalError>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("acceptor".into())
        .spawn(move || loop {
            match listener.accept() {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, "client connected");
                    let ingress = ingress.clone();
                    let stats = stats.clone();
                    std::thread::Builder::new()
                        .name(format!("client-{peer}"))
                        .spawn(move || read_client(socket, &ingress, &stats))
                        .expect("failed to spawn client reader");
                }
                Err(error) => {
                    let _ = fatal_tx.send(FatalError {
                        task: "acceptor",
                        error: error.into(),
                    });
                    return;
                }
            }
        })
        .expect("failed to spawn acceptor")
}

/// Per-connection session: read newline-delimited text until EOF or error,
/// parse each line, and enqueue the valid samples. Parse failures only cost
/// a counter; the connection stays open.
fn read_client(socket: TcpStream, ingress: &IngressSender, stats: &Stats) {
    stats.inc(Counter::ClientConnectionOpening);
    stats.inc_gauge(Gauge::ClientConnectionsActive);

    let peer = socket.peer_addr().ok();
    let mut reader = BufReader::new(socket);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                // EOF before the delimiter leaves a partial line; the
                // session ends without counting it.
                if !buf.ends_with(b"\n") {
                    break;
                }
                stats.inc(Counter::ReceivedMessage);
                match std::str::from_utf8(&buf) {
                    Ok(text) => match parse_line(text.trim()) {
                        Ok(msg) => ingress.send(msg),
                        Err(_) => stats.inc(Counter::InvalidMessage),
                    },
                    Err(_) => stats.inc(Counter::InvalidMessage),
                }
            }
        }
    }

    if let Some(peer) = peer {
        tracing::debug!(%peer, "client disconnected");
    }
    stats.inc(Counter::ClientConnectionClosing);
    stats.dec_gauge(Gauge::ClientConnectionsActive);
}
