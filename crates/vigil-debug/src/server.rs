//! TCP server: frame IO, suspend-notification forwarding, and the
//! per-connection read loop.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::session::SessionState;
use crate::wire::WireMessage;

/// Accepts debugger connections and runs them to disconnect.
pub struct DebugServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl DebugServer {
    /// Bind the listen address.
    pub fn bind(addr: impl ToSocketAddrs, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one connection and serve it until the client disconnects.
    pub fn serve_one(&self) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        info!(%peer, "client connected");
        serve_connection(&stream, &self.dispatcher)?;
        info!(%peer, "client disconnected");
        Ok(())
    }
}

/// Run one established connection: a writer thread owns the socket's
/// write half and drains a frame queue fed by both the command handler
/// and the suspend-notification forwarder.
fn serve_connection(stream: &TcpStream, dispatcher: &Arc<Dispatcher>) -> io::Result<()> {
    let (out_tx, out_rx) = unbounded::<String>();

    let writer_stream = stream.try_clone()?;
    let writer = thread::spawn(move || {
        let mut stream = writer_stream;
        for frame in out_rx {
            if stream.write_all(frame.as_bytes()).is_err() {
                break;
            }
            if stream.flush().is_err() {
                break;
            }
        }
    });

    // Suspend notices flow from application threads through the
    // dispatcher (frame capture, state change) onto the wire.
    let (stop_tx, stop_rx) = channel();
    dispatcher
        .session()
        .runtime()
        .control()
        .set_stop_channel(stop_tx);
    let forwarder = {
        let dispatcher = Arc::clone(dispatcher);
        let out_tx = out_tx.clone();
        thread::spawn(move || {
            'outer: for notice in stop_rx {
                for frame in dispatcher.on_stop(&notice) {
                    if out_tx.send(frame.encode()).is_err() {
                        break 'outer;
                    }
                }
            }
        })
    };

    read_loop(stream, dispatcher, &out_tx)?;

    // Disconnect: tear the session down and unblock the helpers.
    let session = dispatcher.session();
    session.set_state(SessionState::Terminated);
    session.runtime().control().resume_all();
    // Replacing the channel drops the forwarder's sender.
    let (dangling_tx, _) = channel();
    session.runtime().control().set_stop_channel(dangling_tx);
    drop(out_tx);

    forwarder
        .join()
        .map_err(|_| io::Error::other("stop forwarder panicked"))?;
    writer
        .join()
        .map_err(|_| io::Error::other("socket writer panicked"))?;
    Ok(())
}

fn read_loop(
    stream: &TcpStream,
    dispatcher: &Arc<Dispatcher>,
    out_tx: &Sender<String>,
) -> io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            // A vanished client is a disconnect, not an error.
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => break,
            Err(err) => return Err(err),
        };
        if line.is_empty() {
            continue;
        }
        let msg = match WireMessage::decode(&line) {
            Ok(msg) => msg,
            Err(err) => {
                // Logged and dropped; the connection stays open.
                warn!(%err, "dropping malformed frame");
                continue;
            }
        };
        debug!(%msg, "received");
        for reply in dispatcher.handle(&msg) {
            if out_tx.send(reply.encode()).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}
