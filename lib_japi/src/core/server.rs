//! # Server Loop
//!
//! Accepts connections and drives the dispatcher.
//!
//! ## Tasking model
//!
//! The accept loop runs until shutdown is requested. Every admitted client
//! gets two tasks: a reader that extracts complete lines and hands each
//! one to the dispatcher, and a writer that drains the client's write
//! channel with one `write_all` per message. Responses and push messages
//! share that channel, which is what keeps concurrent writes to one socket
//! from interleaving.
//!
//! ## Client teardown
//!
//! EOF, a read error, an oversized line or a failed write all end in the
//! same place: the client is unsubscribed from every push service, removed
//! from the table and its socket is closed. The server itself keeps
//! running; only a failure of the listener is fatal.
//!
//! ## Shutdown
//!
//! [`JapiContext::shutdown`] cancels the context token. The accept loop
//! drains: every client is removed (cascading unsubscribes), the client
//! tasks are joined and the listener socket is dropped.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::connections::line_reader::LineReader;
use crate::connections::listener;
use crate::core::clients::ClientSender;
use crate::core::context::JapiContext;
use crate::error::JapiError;

/// Binds a listener on `port` (all interfaces) and serves until shutdown.
///
/// Returns when [`JapiContext::shutdown`] is called, or with an error if
/// the listener fails.
pub async fn start_server(ctx: Arc<JapiContext>, port: u16) -> Result<(), JapiError> {
    let listener = listener::bind(port)?;
    log::info!(
        "listening on {}",
        listener.local_addr().map_err(JapiError::Io)?
    );
    serve(ctx, listener).await
}

/// Serves an already bound listener until shutdown.
pub async fn serve(ctx: Arc<JapiContext>, listener: TcpListener) -> Result<(), JapiError> {
    let shutdown = ctx.shutdown_token();
    let mut client_tasks = JoinSet::new();

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("accept() failed: {e}");
                        break Err(JapiError::Io(e));
                    }
                };
                if let Some(config) = ctx.tcp_keepalive() {
                    if let Err(e) = listener::apply_keepalive(&stream, &config) {
                        log::warn!("failed to apply TCP keepalive to {peer}: {e}");
                    }
                }

                let socket = stream.as_raw_fd();
                let (tx, rx) = mpsc::unbounded_channel();
                let token = CancellationToken::new();
                if !ctx.try_add_client(socket, tx.clone(), token.clone()) {
                    // Accepted at the TCP layer, rejected here: dropping the
                    // stream closes it without a byte ever being exchanged.
                    log::debug!("rejecting client {peer}: client limit reached");
                    continue;
                }
                log::debug!("client {socket} connected from {peer}");
                client_tasks.spawn(handle_client(Arc::clone(&ctx), stream, socket, tx, rx, token));
            }
            // Reap finished client tasks while running.
            Some(_) = client_tasks.join_next(), if !client_tasks.is_empty() => {}
        }
    };

    ctx.remove_all_clients();
    while client_tasks.join_next().await.is_some() {}
    result
}

async fn handle_client(
    ctx: Arc<JapiContext>,
    stream: TcpStream,
    socket: i32,
    tx: ClientSender,
    rx: mpsc::UnboundedReceiver<Arc<String>>,
    token: CancellationToken,
) {
    let (mut read_half, write_half) = stream.into_split();

    let writer = tokio::spawn(write_loop(Arc::clone(&ctx), write_half, rx, socket));
    read_loop(&ctx, &mut read_half, socket, &tx, &token).await;

    let _ = ctx.remove_client(socket);
    // Dropping our sender lets the writer drain any queued lines and exit
    // once the subscription cascade has dropped the remaining clones.
    drop(tx);
    let _ = writer.await;
}

/// Reads complete lines and dispatches each one until the client goes away
/// or is cancelled. A readiness burst carrying several lines yields one
/// dispatch per line.
async fn read_loop(
    ctx: &JapiContext,
    read_half: &mut OwnedReadHalf,
    socket: i32,
    tx: &ClientSender,
    token: &CancellationToken,
) {
    let mut reader = LineReader::with_max_line_size(ctx.max_line_size());
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = reader.next_line(read_half) => match next {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(response) = ctx.process_line(&line, socket) {
                        if tx.send(Arc::new(response)).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    log::debug!("client {socket} disconnected");
                    break;
                }
                Err(e) => {
                    log::error!("failed to read from client {socket}: {e}");
                    break;
                }
            }
        }
    }
}

/// Drains the client's write channel. Every queued line is emitted with a
/// single write call; the first failed write tears the client down.
async fn write_loop(
    ctx: Arc<JapiContext>,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Arc<String>>,
    socket: i32,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            log::error!("failed to send to client {socket}: {e}");
            let _ = ctx.remove_client(socket);
            break;
        }
    }
}
