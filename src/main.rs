// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// ARQ link over a serial-attached HF modem
use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use arqlink::serial::RealSerialPort;
use arqlink::{ArqConfig, ArqEngine, ArqError, ConnectionState, Delivery, TransferAssembler};

#[derive(Parser)]
#[command(name = "arqlink")]
#[command(about = "Reliable file and text transfer over an HF radio modem", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port of the modem (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Local station callsign
    #[arg(short, long)]
    callsign: String,

    /// Bytes per data block, negotiated down to the remote's limit
    #[arg(long, default_value = "128", value_name = "BYTES")]
    block_size: usize,

    /// Retry timer expiries tolerated before giving up
    #[arg(long, default_value = "5")]
    retries: u32,

    /// Unacknowledged blocks allowed in flight (1 to 32)
    #[arg(long, default_value = "16", value_name = "BLOCKS")]
    window: u8,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a station and send a file
    Send {
        /// File to send
        file: PathBuf,
        /// Remote callsign
        #[arg(long)]
        to: String,
    },
    /// Connect to a station and send a line of text
    Text {
        message: String,
        /// Remote callsign
        #[arg(long)]
        to: String,
    },
    /// Wait for a station to connect and store what it sends
    Receive {
        /// Directory to save received files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| fail(e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| fail(e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| fail(e));

    let config = ArqConfig {
        block_size: cli.block_size,
        max_retries: cli.retries,
        window: cli.window,
        ..ArqConfig::with_callsign(cli.callsign.to_uppercase())
    };

    info!("opening serial port {}", cli.port);
    info!("settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let writer = RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits)
        .unwrap_or_else(|e| fail(format!("Failed to open serial port: {}", e)));
    let reader = writer
        .try_clone()
        .unwrap_or_else(|e| fail(format!("Failed to clone serial port: {}", e)));

    let tick = config.tick_interval;
    let mut engine = ArqEngine::new(config, Box::new(writer)).unwrap_or_else(|e| fail(e));
    let (data_tx, data_rx) = mpsc::channel();
    engine.on_data(move |block| {
        let _ = data_tx.send(block.to_vec());
    });
    let mut station = Station { engine, reader, tick, buf: vec![0u8; 1024] };

    let result = match cli.command {
        Commands::Send { file, to } => {
            if !file.exists() {
                fail(format!("File not found: {}", file.display()));
            }
            station.deliver(&to.to_uppercase(), |engine| engine.send_file(&file))
        }
        Commands::Text { message, to } => {
            let line = format!("{}\n", message);
            station.deliver(&to.to_uppercase(), |engine| engine.send_text(&line))
        }
        Commands::Receive { output_dir } => {
            if !output_dir.is_dir() {
                fail(format!("Output directory not found: {}", output_dir.display()));
            }
            station.receive(&output_dir, &data_rx)
        }
    };

    if let Err(e) = result {
        fail(e);
    }
}

/// The engine plus the read half of the serial line
struct Station {
    engine: ArqEngine,
    reader: RealSerialPort,
    tick: Duration,
    buf: Vec<u8>,
}

impl Station {
    /// One pass of the host loop: wait up to one tick for modem bytes, feed
    /// them, then let the engine run its timers and transmit.
    fn pump(&mut self) -> arqlink::Result<()> {
        let n = self.reader.read_timeout(&mut self.buf, self.tick)?;
        if n > 0 {
            self.engine.feed(&self.buf[..n]);
        }
        self.engine.tick(Instant::now())
    }

    fn wait_until(&mut self, done: impl Fn(&ArqEngine) -> bool) -> arqlink::Result<()> {
        loop {
            if let Some(err) = self.engine.take_failure() {
                return Err(err);
            }
            if done(&self.engine) {
                return Ok(());
            }
            self.pump()?;
        }
    }

    /// Connect, queue the payload, wait for it to be acknowledged, hang up.
    fn deliver(
        &mut self,
        remote: &str,
        queue: impl FnOnce(&mut ArqEngine) -> arqlink::Result<usize>,
    ) -> arqlink::Result<()> {
        self.engine.connect(remote)?;
        self.wait_until(|e| e.state() == ConnectionState::Connected)?;

        let blocks = queue(&mut self.engine)?;
        info!("{} blocks queued for {}", blocks, remote);
        self.wait_until(|e| e.is_idle() && e.state() == ConnectionState::Connected)?;

        let stats = self.engine.stats();
        info!(
            "delivered: {} frames sent, {} retransmitted",
            stats.frames_sent, stats.retransmissions
        );
        self.engine.disconnect()?;
        self.wait_until(|e| e.state() == ConnectionState::Down)
    }

    /// Answer one incoming session and store what arrives.
    fn receive(&mut self, output_dir: &Path, data: &Receiver<Vec<u8>>) -> arqlink::Result<()> {
        let mut assembler = TransferAssembler::new();
        let mut session = false;
        info!("waiting for a connection as {}", self.engine.config().callsign);

        loop {
            self.pump()?;
            for block in data.try_iter() {
                for delivery in assembler.push(&block) {
                    store(output_dir, delivery)?;
                }
            }

            match self.engine.state() {
                ConnectionState::Down if session => break,
                ConnectionState::Down => {}
                _ if !session => {
                    session = true;
                    info!("{} connected", self.engine.remote().unwrap_or("?"));
                }
                _ => {}
            }
        }

        for delivery in assembler.finish() {
            store(output_dir, delivery)?;
        }
        match self.engine.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn store(output_dir: &Path, delivery: Delivery) -> Result<(), ArqError> {
    match delivery {
        Delivery::Text(line) => println!("{}", line),
        Delivery::File { name, contents } => {
            let path = output_dir.join(&name);
            std::fs::write(&path, &contents)?;
            info!("saved {} ({} bytes)", path.display(), contents.len());
        }
        Delivery::Corrupt { name } => warn!("discarded damaged file {}", name),
    }
    Ok(())
}
