//! Sends a few lines to a line server and prints the replies.
//!
//! ```text
//! cargo run --example line_client -- 127.0.0.1 7000 hello world
//! ```

use std::{cell::Cell, rc::Rc};

use anyhow::{bail, Result};
use sockpoll::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Client {
    lines: Vec<String>,
    expected: Cell<usize>,
    stop: StopHandle,
    failed: Rc<Cell<bool>>,
}

impl SocketHandler for Client {
    fn on_connected(&self, socket: &Socket, _at: std::time::SystemTime) {
        info!(remote = ?socket.remote_addr().ok(), "connected");
        for line in &self.lines {
            if let Err(e) = socket.write(format!("{}\n", line).as_bytes()) {
                warn!(error = %e, "write rejected");
            }
        }
    }

    fn on_read_queue_filled(&self, socket: &Socket, _bytes_read: usize) {
        while let Some(reply) = socket.read_line() {
            println!("{}", reply);
            let left = self.expected.get().saturating_sub(1);
            self.expected.set(left);
            if left == 0 {
                let _ = socket.disconnect();
                self.stop.stop();
            }
        }
    }

    fn on_connection_failed(&self, _socket: &Socket, reason: sockpoll::SocketError) {
        warn!(%reason, "could not connect");
        self.failed.set(true);
        self.stop.stop();
    }

    fn on_disconnected(&self, _socket: &Socket, cause: DisconnectCause) {
        if cause == DisconnectCause::Remote {
            warn!("server closed the connection early");
            self.stop.stop();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(7000);
    let mut lines: Vec<String> = args.collect();
    if lines.is_empty() {
        lines.push("ping".to_string());
    }

    let event_loop = EventLoop::new()?;
    let config = SocketConfig::builder().address(address).port(port).build()?;
    let socket = Socket::new(event_loop.poller(), config)?;
    let failed = Rc::new(Cell::new(false));

    socket.set_handler(Client {
        expected: Cell::new(lines.len()),
        lines,
        stop: event_loop.stop_handle(),
        failed: failed.clone(),
    });
    socket.connect()?;
    event_loop.run()?;

    if failed.get() {
        bail!("connection failed");
    }
    Ok(())
}
