use anstyle::AnsiColor;
use clap::builder::styling::Styles;
use clap::{ArgGroup, Parser};
use std::time::Duration;

use crate::session::{Direction, TransferConfig};
use crate::{DEF_RETRY_COUNT, DEF_TIMEOUT_MS, MODE_OCTET, TFTP_PORT};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default())
    .usage(AnsiColor::Green.on_default())
    .literal(AnsiColor::Cyan.on_default())
    .placeholder(AnsiColor::Red.on_default());

#[derive(Parser, Debug)]
#[command(name = "tftp")]
#[command(about = "A simple TFTP client", long_about = None)]
#[command(styles = STYLES)]
#[command(group(ArgGroup::new("direction").required(true).args(["get", "put"])))]
pub struct Cli {
    /// Download FILENAME from HOSTNAME
    #[arg(short = 'g')]
    pub get: bool,

    /// Upload the local FILENAME to HOSTNAME
    #[arg(short = 'p')]
    pub put: bool,

    #[arg(value_name = "FILENAME")]
    pub filename: String,

    #[arg(value_name = "HOSTNAME")]
    pub hostname: String,

    /// Server port for the initial request
    #[arg(long, default_value_t = TFTP_PORT)]
    pub port: u16,

    /// Timeout (ms)
    #[arg(short, long, default_value_t = DEF_TIMEOUT_MS)]
    pub timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = DEF_RETRY_COUNT)]
    pub retry: u8,

    /// Log every packet
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn direction(&self) -> Direction {
        if self.put {
            Direction::Upload
        } else {
            Direction::Download
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            mode: MODE_OCTET.to_string(),
            timeout: Duration::from_millis(self.timeout),
            max_retries: self.retry,
        }
    }
}
