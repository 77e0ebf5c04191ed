use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tokio::fs::File;
use tokio::io::BufWriter;
use tracing_subscriber::EnvFilter;

use tftp_client::{resolve, Cli, Direction, LocalFile, TransferReport, TransferSession, UdpChannel};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match transfer(&args).await {
        Ok(report) => {
            let secs = report.elapsed.as_secs_f64();
            println!(
                "{} {} bytes in {:.3}s ({:.2} KB/s, {} retransmissions)",
                match args.direction() {
                    Direction::Download => "received",
                    Direction::Upload => "sent",
                },
                report.bytes,
                secs,
                report.bytes as f64 / secs.max(f64::EPSILON) / 1024.0,
                report.retransmissions
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tftp: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn transfer(args: &Cli) -> anyhow::Result<TransferReport> {
    let server = resolve(&args.hostname, args.port).await?;
    let channel = UdpChannel::bind_for(server).await?;
    let config = args.transfer_config();

    let report = match args.direction() {
        Direction::Download => {
            let file = File::create(&args.filename)
                .await
                .with_context(|| format!("cannot create {}", args.filename))?;
            let mut sink = BufWriter::new(file);
            TransferSession::new(
                channel,
                LocalFile::Sink(&mut sink),
                args.filename.as_str(),
                server,
                config,
            )
            .run()
            .await
            .with_context(|| format!("download of {} failed", args.filename))?
        }
        Direction::Upload => {
            let mut source = File::open(&args.filename)
                .await
                .with_context(|| format!("cannot open {}", args.filename))?;
            TransferSession::new(
                channel,
                LocalFile::Source(&mut source),
                args.filename.as_str(),
                server,
                config,
            )
            .run()
            .await
            .with_context(|| format!("upload of {} failed", args.filename))?
        }
    };
    Ok(report)
}
