mod channel;
mod cli;
mod error;
mod packet;
mod session;
mod stream;

pub use crate::channel::{resolve, DatagramChannel, Recv, UdpChannel};
pub use crate::cli::Cli;
pub use crate::error::{ErrorCode, Result, TftpError};
pub use crate::packet::TftpPacket;
pub use crate::session::{Direction, LocalFile, TransferConfig, TransferReport, TransferSession};
pub use crate::stream::{ByteSink, ByteSource};

pub const DEF_BLOCK_SIZE: u16 = 512; // RFC 1350
pub const MAX_PACKET_SIZE: usize = DEF_BLOCK_SIZE as usize + 4;

pub const TFTP_PORT: u16 = 69;
pub const MODE_OCTET: &str = "octet";

pub const DEF_TIMEOUT_MS: u64 = 1000;
pub const DEF_RETRY_COUNT: u8 = 5;
