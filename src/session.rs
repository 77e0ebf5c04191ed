//! The lock-step transfer state machine.
//!
//! A [`TransferSession`] sends one request to the server's well-known port,
//! locks onto whichever address answers first, and then alternates
//! DATA and ACK packets with that peer until a short DATA block closes the
//! transfer. Exactly one packet is outstanding at any time; on timeout the
//! bytes of that packet are sent again unchanged.

use std::net::SocketAddr;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::channel::{DatagramChannel, Recv};
use crate::error::{ErrorCode, Result, TftpError};
use crate::packet::TftpPacket;
use crate::stream::{ByteSink, ByteSource};
use crate::{DEF_BLOCK_SIZE, DEF_RETRY_COUNT, DEF_TIMEOUT_MS, MODE_OCTET};

const BLOCK_LEN: usize = DEF_BLOCK_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub mode: String,
    /// How long to wait for a reply before resending
    pub timeout: Duration,
    /// Resends allowed per outstanding packet
    pub max_retries: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: MODE_OCTET.to_string(),
            timeout: Duration::from_millis(DEF_TIMEOUT_MS),
            max_retries: DEF_RETRY_COUNT,
        }
    }
}

/// Local end of the transfer: where upload data comes from or download
/// data goes to.
pub enum LocalFile<'a> {
    Source(&'a mut dyn ByteSource),
    Sink(&'a mut dyn ByteSink),
}

impl LocalFile<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            LocalFile::Source(_) => Direction::Upload,
            LocalFile::Sink(_) => Direction::Download,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub blocks: u64,
    pub retransmissions: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingFirstReply,
    AwaitingData,
    AwaitingAck,
}

pub struct TransferSession<'a, C> {
    channel: C,
    file: LocalFile<'a>,
    direction: Direction,
    filename: String,
    config: TransferConfig,
    server: SocketAddr,
    peer: Option<SocketAddr>,
    state: State,
    block: u16,
    final_block: bool,
    /// Upload: length of the DATA payload waiting for its ACK
    in_flight: Option<usize>,
    last_sent: Vec<u8>,
    last_dest: SocketAddr,
    deadline: Instant,
    retries: u8,
    bytes: u64,
    blocks: u64,
    retransmissions: u32,
}

impl<'a, C: DatagramChannel> TransferSession<'a, C> {
    pub fn new(
        channel: C,
        file: LocalFile<'a>,
        filename: impl Into<String>,
        server: SocketAddr,
        config: TransferConfig,
    ) -> Self {
        let direction = file.direction();
        Self {
            channel,
            file,
            direction,
            filename: filename.into(),
            config,
            server,
            peer: None,
            state: State::AwaitingFirstReply,
            block: 0,
            final_block: false,
            in_flight: None,
            last_sent: Vec::new(),
            last_dest: server,
            deadline: Instant::now(),
            retries: 0,
            bytes: 0,
            blocks: 0,
            retransmissions: 0,
        }
    }

    /// Runs the transfer to completion.
    ///
    /// # Errors
    /// Any failure ends the transfer immediately. When the peer is known and
    /// the failure is on our side (bad packet, local i/o), the peer gets one
    /// ERROR packet before this returns. A download sink is flushed either
    /// way so the partial file keeps what was received.
    pub async fn run(mut self) -> Result<TransferReport> {
        let start = Instant::now();
        let filename = self.filename.clone();
        let mode = self.config.mode.clone();
        let request = match self.direction {
            Direction::Download => TftpPacket::RRQ { filename, mode },
            Direction::Upload => TftpPacket::WRQ { filename, mode },
        };
        info!(
            server = %self.server,
            file = %self.filename,
            direction = ?self.direction,
            "sending {}",
            request.name()
        );
        let server = self.server;
        self.send(&request, server).await?;

        if let Err(err) = self.drive().await {
            self.notify_peer(&err).await;
            self.flush_partial().await;
            return Err(err);
        }

        let report = TransferReport {
            bytes: self.bytes,
            blocks: self.blocks,
            retransmissions: self.retransmissions,
            elapsed: start.elapsed(),
        };
        info!(
            bytes = report.bytes,
            blocks = report.blocks,
            retransmissions = report.retransmissions,
            "transfer complete"
        );
        Ok(report)
    }

    async fn drive(&mut self) -> Result<()> {
        while !self.final_block {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            let (buf, from) = match self.channel.recv(remaining).await? {
                Recv::Datagram(buf, from) => (buf, from),
                Recv::Timeout => {
                    self.retransmit().await?;
                    continue;
                }
            };

            if !self.accept_sender(from).await? {
                continue;
            }

            let pkt = TftpPacket::deserialize(&buf)?;
            debug!(from = %from, "received {}", describe(&pkt));
            if let TftpPacket::ERROR { code, msg } = pkt {
                warn!(code, kind = %ErrorCode::from(code), "peer aborted: {msg}");
                return Err(TftpError::Peer { code, message: msg });
            }

            match self.direction {
                Direction::Download => self.on_download(pkt).await?,
                Direction::Upload => self.on_upload(pkt).await?,
            }
        }

        if let LocalFile::Sink(sink) = &mut self.file {
            sink.finish().await?;
        }
        Ok(())
    }

    /// Locks the peer to the first sender and turns away everyone else.
    async fn accept_sender(&mut self, from: SocketAddr) -> Result<bool> {
        match self.peer {
            Some(peer) if peer == from => Ok(true),
            Some(peer) => {
                warn!(from = %from, peer = %peer, "datagram from unknown transfer ID");
                let reject = TftpPacket::ERROR {
                    code: ErrorCode::UnknownTransferId.into(),
                    msg: "Unknown transfer ID".to_string(),
                }
                .serialize()?;
                self.channel.send_to(&reject, from).await?;
                Ok(false)
            }
            None => {
                debug!(peer = %from, "locked peer address");
                self.peer = Some(from);
                Ok(true)
            }
        }
    }

    async fn on_download(&mut self, pkt: TftpPacket) -> Result<()> {
        let (block, data) = match pkt {
            TftpPacket::DATA { block, data } => (block, data),
            other => {
                return Err(TftpError::Protocol(format!(
                    "unexpected {} while downloading",
                    other.name()
                )))
            }
        };

        let expected = self.block.wrapping_add(1);
        if block != expected {
            if self.state == State::AwaitingFirstReply {
                return Err(TftpError::Protocol(format!(
                    "first DATA block is #{block}, expected #1"
                )));
            }
            // Duplicate or out of order: repeat the last ACK, write nothing
            warn!(block, current = self.block, "unexpected block, re-acking");
            self.resend().await?;
            return Ok(());
        }

        if let LocalFile::Sink(sink) = &mut self.file {
            sink.write_chunk(&data).await?;
        }
        self.block = block;
        self.blocks += 1;
        self.bytes += data.len() as u64;
        self.retries = 0;

        let peer = self.peer_addr();
        self.send(&TftpPacket::ACK(block), peer).await?;

        if data.len() < BLOCK_LEN {
            self.final_block = true;
        } else {
            self.state = State::AwaitingData;
        }
        Ok(())
    }

    async fn on_upload(&mut self, pkt: TftpPacket) -> Result<()> {
        let block = match pkt {
            TftpPacket::ACK(block) => block,
            other => {
                return Err(TftpError::Protocol(format!(
                    "unexpected {} while uploading",
                    other.name()
                )))
            }
        };

        if block != self.block {
            if self.state == State::AwaitingFirstReply {
                return Err(TftpError::Protocol(format!(
                    "write request answered with ACK #{block}, expected #0"
                )));
            }
            // Stale duplicate; the deadline keeps running
            warn!(block, current = self.block, "ignoring stale ACK");
            return Ok(());
        }

        self.retries = 0;
        if let Some(len) = self.in_flight.take() {
            self.blocks += 1;
            self.bytes += len as u64;
            if len < BLOCK_LEN {
                self.final_block = true;
                return Ok(());
            }
        }

        let LocalFile::Source(source) = &mut self.file else {
            return Err(TftpError::Protocol("upload has no data source".into()));
        };
        let data = source.read_chunk(BLOCK_LEN).await?;
        self.block = self.block.wrapping_add(1);
        self.in_flight = Some(data.len());
        self.state = State::AwaitingAck;

        let peer = self.peer_addr();
        let block = self.block;
        self.send(&TftpPacket::DATA { block, data }, peer).await
    }

    async fn send(&mut self, pkt: &TftpPacket, dest: SocketAddr) -> Result<()> {
        let bytes = pkt.serialize()?;
        debug!(to = %dest, "sending {}", describe(pkt));
        self.channel.send_to(&bytes, dest).await?;
        self.last_sent = bytes;
        self.last_dest = dest;
        self.deadline = Instant::now() + self.config.timeout;
        Ok(())
    }

    async fn resend(&mut self) -> Result<()> {
        self.channel.send_to(&self.last_sent, self.last_dest).await?;
        Ok(())
    }

    async fn retransmit(&mut self) -> Result<()> {
        if self.retries >= self.config.max_retries {
            warn!(retries = self.retries, "giving up");
            return Err(TftpError::TimeoutExhausted {
                retries: self.retries,
            });
        }
        self.retries += 1;
        self.retransmissions += 1;
        warn!(
            attempt = self.retries,
            block = self.block,
            to = %self.last_dest,
            "timeout, retransmitting"
        );
        self.resend().await?;
        self.deadline = Instant::now() + self.config.timeout;
        Ok(())
    }

    /// Best effort: tell the peer why we are leaving.
    async fn notify_peer(&mut self, err: &TftpError) {
        let (Some(peer), Some(code)) = (self.peer, courtesy_code(err)) else {
            return;
        };
        let msg = err.to_string();
        let pkt = TftpPacket::ERROR {
            code: code.into(),
            msg,
        };
        if let Ok(bytes) = pkt.serialize() {
            if let Err(e) = self.channel.send_to(&bytes, peer).await {
                debug!("failed to send ERROR to peer: {e}");
            }
        }
    }

    async fn flush_partial(&mut self) {
        if let LocalFile::Sink(sink) = &mut self.file {
            if let Err(e) = sink.finish().await {
                warn!("failed to flush partial download: {e}");
            }
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer.unwrap_or(self.server)
    }
}

fn courtesy_code(err: &TftpError) -> Option<ErrorCode> {
    match err {
        TftpError::Malformed(_) | TftpError::Protocol(_) => Some(ErrorCode::IllegalOperation),
        TftpError::Io(_) => Some(ErrorCode::NotDefined),
        _ => None,
    }
}

fn describe(pkt: &TftpPacket) -> String {
    match pkt {
        TftpPacket::DATA { block, data } => format!("DATA #{block} ({} bytes)", data.len()),
        TftpPacket::ACK(block) => format!("ACK #{block}"),
        TftpPacket::ERROR { code, msg } => format!("ERROR {code} {msg:?}"),
        other => other.name().to_string(),
    }
}
