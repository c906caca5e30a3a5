use crate::command;
use crate::config::SharedConfig;
use crate::connection::ClientState;
use crate::error::HiveError;
use crate::hub::SharedHub;
use crate::resp::{Frame, FrameParser};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bind the configured address and serve until ctrl-c.
pub async fn run_server(hub: SharedHub, config: SharedConfig) -> std::io::Result<()> {
    let (bind, port) = {
        let cfg = config.read().await;
        (cfg.bind.clone(), cfg.port)
    };

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("hivepoll listening on {addr}");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal.cancel();
        }
    });

    serve(listener, hub, config, shutdown).await
}

/// Accept loop. Cancelling `shutdown` stops accepting and cancels every
/// blocking call in flight, which then replies with whatever it has.
pub async fn serve(
    listener: TcpListener,
    hub: SharedHub,
    config: SharedConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                debug!("New connection from {peer_addr}");

                let hub = hub.clone();
                let config = config.clone();
                let client = ClientState::new(&shutdown);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub, config, client).await {
                        debug!("Connection error from {peer_addr}: {e}");
                    }
                    debug!("Connection closed: {peer_addr}");
                });
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    hub: SharedHub,
    config: SharedConfig,
    mut client: ClientState,
) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    // Dropped connections must release their waits, so the socket keeps being
    // read while a command runs. EOF only cancels waits: a client that
    // half-closes after sending still gets its replies.
    let disconnected = client.cancel.clone();
    let mut closed = false;

    loop {
        loop {
            let frame = match FrameParser::parse(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let reply = Frame::error(HiveError::Protocol(e.to_string()).to_resp_error());
                    stream.write_all(&reply.encode()).await?;
                    return Ok(());
                }
            };

            let reply = {
                let work = process_frame(frame, &hub, &config, &mut client);
                tokio::pin!(work);
                loop {
                    tokio::select! {
                        biased;
                        reply = &mut work => break reply,
                        read = stream.read_buf(&mut buf), if !closed => match read {
                            Ok(0) | Err(_) => {
                                closed = true;
                                disconnected.cancel();
                            }
                            Ok(_) => {}
                        },
                    }
                }
            };

            if let Some(reply) = reply {
                if let Err(e) = stream.write_all(&reply.encode()).await {
                    if closed {
                        debug!(client = client.id, "peer went away before reply");
                        return Ok(());
                    }
                    return Err(e);
                }
            }
            if client.should_close {
                return Ok(());
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
            }
            _ = disconnected.cancelled() => return Ok(()),
        }
    }
}

/// `None` means no reply at all (an empty inline line).
async fn process_frame(
    frame: Frame,
    hub: &SharedHub,
    config: &SharedConfig,
    client: &mut ClientState,
) -> Option<Frame> {
    let items = match frame {
        Frame::Array(Some(items)) if items.is_empty() => return None,
        Frame::Array(Some(items)) => items,
        _ => return Some(Frame::error("ERR invalid command format")),
    };

    let Some(cmd_name) = items[0].to_text().map(|name| name.to_uppercase()) else {
        return Some(Frame::error("ERR invalid command name"));
    };

    client.commands_processed += 1;
    Some(command::dispatch(&cmd_name, &items[1..], hub, config, client).await)
}
