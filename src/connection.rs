use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub name: Option<String>,
    pub should_close: bool,
    /// Cancelled when the peer goes away or the server shuts down. Every
    /// blocking call made on behalf of this client derives its signal from it.
    pub cancel: CancellationToken,
    pub commands_processed: u64,
}

impl ClientState {
    pub fn new(parent: &CancellationToken) -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            name: None,
            should_close: false,
            cancel: parent.child_token(),
            commands_processed: 0,
        }
    }
}
