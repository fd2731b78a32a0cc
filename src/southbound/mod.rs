//! OpenFlow channel to the switches
//!
//! Each accepted TCP connection runs on its own task. Connection tasks only
//! frame and parse messages; all decisions happen on the controller task
//! they feed through a [`SwitchEvent`] channel.

pub mod connection;
pub mod handle;

pub use connection::{ConnectionContext, serve_connection};
pub use handle::SwitchHandle;

use crate::Result;
use crate::controller::SwitchEvent;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Accept switch connections until `events` is closed
pub async fn serve(
    listener: TcpListener,
    events: mpsc::Sender<SwitchEvent<SwitchHandle>>,
    ctx: ConnectionContext,
) -> Result<()> {
    info!("OpenFlow listener on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            },
            _ = events.closed() => break,
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "set_nodelay failed: {}", e);
        }
        debug!(%peer, "switch connecting");

        let events = events.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, events, ctx).await {
                warn!(%peer, "switch connection ended: {}", e);
            }
        });
    }

    info!("OpenFlow listener stopped");
    Ok(())
}
