//! One switch connection: handshake, then a read loop feeding the controller
//!
//! ```text
//! switch ──TCP──► reader ──SwitchEvent──► controller task
//!    ▲                                          │
//!    └──── writer task ◄── Outbox ◄─ SwitchHandle
//! ```

use super::handle::{Outbox, SwitchHandle};
use crate::controller::{ConnectionId, SwitchEvent};
use crate::openflow::{
    DatapathId, HEADER_LEN, Header, Message, OFP_VERSION, PortDesc, PortNo, SwitchFeatures,
};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{debug, info, trace, warn};

const XID_HELLO: u32 = 1;
const XID_FEATURES: u32 = 2;
const XID_PORT_DESC: u32 = 3;
const XID_ECHO: u32 = 4;

pub const DEFAULT_ECHO_INTERVAL: Duration = Duration::from_secs(15);

/// Settings shared by every connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Configured port addresses, used when the switch omits a port
    pub fallback_port_macs: Arc<HashMap<PortNo, MacAddr>>,
    pub metrics: Arc<MetricsRegistry>,
    /// Idle time before the controller sends ECHO_REQUEST. A switch that
    /// stays silent for a second interval is dropped.
    pub echo_interval: Duration,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            fallback_port_macs: Arc::default(),
            metrics: Arc::default(),
            echo_interval: DEFAULT_ECHO_INTERVAL,
        }
    }
}

/// Read one framed message without decoding its body; `None` on a clean
/// close between messages.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(Header, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = Header::parse(&head)?;
    let mut body = vec![0u8; header.body_len()];
    reader.read_exact(&mut body).await?;

    Ok(Some((header, body)))
}

/// Read and decode one message; `None` on a clean close between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<(Header, Message)>>
where
    R: AsyncRead + Unpin,
{
    let Some((header, body)) = read_frame(reader).await? else {
        return Ok(None);
    };
    let msg = Message::decode(&header, &body)?;
    Ok(Some((header, msg)))
}

pub async fn write_message<W>(writer: &mut W, msg: &Message, xid: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.encode(xid)).await?;
    Ok(())
}

async fn expect_message<R, W>(reader: &mut R, writer: &mut W, waiting_for: &str) -> Result<Message>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some((header, msg)) = read_message(reader).await? else {
            return Err(Error::Protocol(format!(
                "connection closed waiting for {}",
                waiting_for
            )));
        };

        match msg {
            Message::EchoRequest(data) => {
                write_message(writer, &Message::EchoReply(data), header.xid).await?;
            }
            Message::Error { err_type, code, .. } => {
                return Err(Error::Protocol(format!(
                    "switch error type {} code {} waiting for {}",
                    err_type, code, waiting_for
                )));
            }
            msg => return Ok(msg),
        }
    }
}

/// Exchange HELLO, then fetch features and the port list
pub async fn handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<(SwitchFeatures, Vec<PortDesc>)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_message(writer, &Message::Hello, XID_HELLO).await?;

    let Some((header, msg)) = read_message(reader).await? else {
        return Err(Error::Protocol("connection closed before HELLO".into()));
    };
    if msg != Message::Hello {
        return Err(Error::Protocol(format!(
            "expected HELLO, got type {}",
            header.msg_type
        )));
    }
    if header.version < OFP_VERSION {
        return Err(Error::Protocol(format!(
            "switch speaks version 0x{:02x}, need 0x{:02x}",
            header.version, OFP_VERSION
        )));
    }

    write_message(writer, &Message::FeaturesRequest, XID_FEATURES).await?;
    let features = loop {
        match expect_message(reader, writer, "FEATURES_REPLY").await? {
            Message::FeaturesReply(features) => break features,
            other => trace!(msg_type = other.msg_type(), "ignored during handshake"),
        }
    };

    write_message(writer, &Message::PortDescRequest, XID_PORT_DESC).await?;
    let mut ports = Vec::new();
    loop {
        match expect_message(reader, writer, "PORT_DESC reply").await? {
            Message::PortDescReply { ports: part, more } => {
                ports.extend(part);
                if !more {
                    break;
                }
            }
            other => trace!(msg_type = other.msg_type(), "ignored during handshake"),
        }
    }

    Ok((features, ports))
}

async fn write_loop<W>(mut writer: W, mut outbox: mpsc::UnboundedReceiver<Vec<u8>>, datapath: DatapathId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbox.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!(datapath = %datapath, "write failed: {}", e);
            break;
        }
    }
}

/// Serve one switch until it disconnects.
///
/// After the handshake the controller receives the switch's handle in a
/// `Connected` event, then every packet-in; a `Disconnected` event follows
/// whenever the connection ends after a successful handshake.
pub async fn serve_connection<S>(
    stream: S,
    events: mpsc::Sender<SwitchEvent<SwitchHandle>>,
    ctx: ConnectionContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (features, ports) = handshake(&mut reader, &mut writer).await?;
    let datapath = features.datapath_id;
    info!(
        datapath = %datapath,
        n_buffers = features.n_buffers,
        n_tables = features.n_tables,
        ports = ports.len(),
        "handshake complete"
    );
    for port in &ports {
        debug!(datapath = %datapath, port = port.port_no, mac = %port.hw_addr, name = %port.name, "port");
    }

    let connection = ConnectionId::next();
    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, outbox_rx, datapath));

    let handle = SwitchHandle::new(
        datapath,
        outbox.clone(),
        &ports,
        ctx.fallback_port_macs.clone(),
        ctx.metrics.clone(),
    );
    let connected = SwitchEvent::Connected { connection, handle };
    if events.send(connected).await.is_err() {
        writer_task.abort();
        return Err(Error::Protocol("controller stopped".into()));
    }

    let mut channel = Channel {
        datapath,
        outbox: &outbox,
        metrics: &ctx.metrics,
        keepalive: interval_at(Instant::now() + ctx.echo_interval, ctx.echo_interval),
        echo_outstanding: false,
    };
    let result = read_loop(&mut reader, &mut channel, &events).await;

    let _ = events
        .send(SwitchEvent::Disconnected {
            datapath,
            connection,
        })
        .await;
    drop(outbox);
    writer_task.abort();
    result
}

/// Read-side state of an established connection
struct Channel<'a> {
    datapath: DatapathId,
    outbox: &'a Outbox,
    metrics: &'a MetricsRegistry,
    keepalive: Interval,
    echo_outstanding: bool,
}

impl Channel<'_> {
    /// Wait for the next frame, probing the switch with ECHO_REQUEST while
    /// it is idle.
    async fn next_frame<R>(&mut self, reader: &mut R) -> Result<Option<(Header, Vec<u8>)>>
    where
        R: AsyncRead + Unpin,
    {
        // Polled to completion across ticks; dropping it mid-read would lose bytes
        let read = read_frame(reader);
        tokio::pin!(read);

        loop {
            tokio::select! {
                frame = &mut read => {
                    self.echo_outstanding = false;
                    self.keepalive.reset();
                    return frame;
                }
                _ = self.keepalive.tick() => {
                    if self.echo_outstanding {
                        return Err(Error::Protocol("switch stopped answering echo requests".into()));
                    }
                    trace!(datapath = %self.datapath, "idle, sending echo request");
                    let _ = self.outbox.send(Message::EchoRequest(Vec::new()).encode(XID_ECHO));
                    self.echo_outstanding = true;
                }
            }
        }
    }
}

async fn read_loop<R>(
    reader: &mut R,
    channel: &mut Channel<'_>,
    events: &mpsc::Sender<SwitchEvent<SwitchHandle>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let datapath = channel.datapath;

    while let Some((header, body)) = channel.next_frame(reader).await? {
        let msg = match Message::decode(&header, &body) {
            Ok(msg) => msg,
            Err(e) => {
                channel.metrics.malformed_messages.inc();
                warn!(
                    datapath = %datapath,
                    xid = header.xid,
                    msg_type = header.msg_type,
                    "discarding malformed message: {}",
                    e
                );
                continue;
            }
        };

        match msg {
            Message::PacketIn(packet_in) => {
                let event = SwitchEvent::PacketIn {
                    datapath,
                    packet_in,
                };
                if events.send(event).await.is_err() {
                    return Err(Error::Protocol("controller stopped".into()));
                }
            }
            Message::EchoRequest(data) => {
                let _ = channel.outbox.send(Message::EchoReply(data).encode(header.xid));
            }
            Message::EchoReply(_) => {
                trace!(datapath = %datapath, "echo reply");
            }
            Message::Error {
                err_type,
                code,
                data,
            } => {
                warn!(
                    datapath = %datapath,
                    xid = header.xid,
                    err_type,
                    code,
                    len = data.len(),
                    "switch reported error"
                );
            }
            other => {
                trace!(datapath = %datapath, msg_type = other.msg_type(), "ignored");
            }
        }
    }

    info!(datapath = %datapath, "connection closed by switch");
    Ok(())
}
