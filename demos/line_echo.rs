//! Line echo server.
//!
//! ```text
//! RUST_LOG=debug cargo run --example line_echo -- 127.0.0.1 7000
//! ```
//!
//! Every complete line a client sends is written back upper-cased. A
//! client sending `QUIT` is disconnected.

use std::{cell::RefCell, rc::Rc};

use anyhow::Result;
use sockpoll::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Clients = Rc<RefCell<Vec<Socket>>>;

struct Echo {
    clients: Clients,
}

impl Echo {
    fn forget_closed(&self) {
        self.clients.borrow_mut().retain(Socket::is_open);
    }
}

impl SocketHandler for Echo {
    fn on_read_queue_filled(&self, socket: &Socket, _bytes_read: usize) {
        for line in socket.read_lines().unwrap_or_default() {
            if line.trim() == "QUIT" {
                let _ = socket.disconnect();
                return;
            }
            let _ = socket.write(format!("{}\n", line.to_uppercase()).as_bytes());
        }
    }

    fn on_disconnected(&self, socket: &Socket, cause: DisconnectCause) {
        info!(?cause, socket = ?socket, "client left");
        self.forget_closed();
    }

    fn on_read_exception(&self, _socket: &Socket, reason: sockpoll::SocketError) {
        info!(%reason, "client read failed");
        self.forget_closed();
    }

    fn on_write_exception(&self, _socket: &Socket, reason: sockpoll::SocketError) {
        info!(%reason, "client write failed");
        self.forget_closed();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(7000);

    let event_loop = EventLoop::new()?;
    let config = ListenerConfig::builder().address(address).port(port).build()?;
    let listener = Listener::new(event_loop.poller(), config)?;

    let clients: Clients = Rc::default();
    let registry = clients.clone();
    listener.set_handler(move |_: &Listener, event: ListenerEvent| match event {
        ListenerEvent::Accepted(socket) => {
            info!(peer = ?socket.remote_addr().ok(), "client joined");
            socket.set_handler(Echo {
                clients: registry.clone(),
            });
            registry.borrow_mut().push(socket);
        }
        ListenerEvent::AcceptFailed(reason) => info!(%reason, "accept failed"),
        ListenerEvent::Terminated => info!("listener closed"),
    });
    listener.listen()?;
    info!(port = listener.port(), "echo server ready");

    event_loop.run()?;
    Ok(())
}
