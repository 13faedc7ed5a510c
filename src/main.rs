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

use clap::{ArgGroup, Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use xmodem::{
    Config, CountingObserver, SerialTransport, TcpTransport, Transport, XmodemError,
    XmodemReceiver, XmodemSender,
};

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over a serial line or TCP", long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(group(ArgGroup::new("link").required(true).args(["port", "connect", "listen"])))]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: Option<String>,

    /// Connect to a TCP peer (e.g., 127.0.0.1:9000)
    #[arg(short, long, value_name = "ADDR")]
    connect: Option<String>,

    /// Wait for a single TCP peer on this address
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

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

    /// Seconds to wait for the peer before counting a timeout
    #[arg(long, default_value = "10", value_name = "SECS")]
    timeout: u64,

    /// Log a count of receiver events when the transfer ends
    #[arg(long)]
    report: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file
    Receive {
        /// Name to save the file under
        file: PathBuf,

        /// Directory to save the received file
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

fn open_link(cli: &Cli) -> Result<Box<dyn Transport>, String> {
    if let Some(port) = &cli.port {
        let data_bits = parse_data_bits(cli.data_bits)?;
        let parity = parse_parity(&cli.parity)?;
        let stop_bits = parse_stop_bits(cli.stop_bits)?;

        log::info!("Opening serial port: {}", port);
        log::info!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

        let transport = SerialTransport::open(port, cli.baud, data_bits, parity, stop_bits)
            .map_err(|e| format!("Failed to open serial port: {}", e))?;
        return Ok(Box::new(transport));
    }

    if let Some(addr) = &cli.connect {
        let transport = TcpTransport::connect(addr.as_str())
            .map_err(|e| format!("Failed to connect to {}: {}", addr, e))?;
        return Ok(Box::new(transport));
    }

    if let Some(addr) = &cli.listen {
        let transport = TcpTransport::accept(addr.as_str())
            .map_err(|e| format!("Failed to accept on {}: {}", addr, e))?;
        return Ok(Box::new(transport));
    }

    Err("One of --port, --connect or --listen is required".to_string())
}

enum Job {
    Send(PathBuf),
    Receive { output_dir: PathBuf, target: PathBuf },
}

/// Where `receive` will write, refusing to replace an existing file.
fn receive_target(output_dir: &Path, file: &Path) -> Result<PathBuf, String> {
    if !output_dir.is_dir() {
        return Err(format!("Output directory not found: {}", output_dir.display()));
    }
    let name = file
        .file_name()
        .ok_or_else(|| format!("No file name in {}", file.display()))?;
    let target = output_dir.join(name);
    if target.exists() {
        return Err(format!("{} already exists", target.display()));
    }
    Ok(target)
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = Config::default().with_response_timeout(Duration::from_secs(cli.timeout));

    // Validate before opening the link so a bad target never starts a transfer
    let job = match &cli.command {
        Commands::Send { file } => {
            if !file.is_file() {
                eprintln!("Error: File not found: {}", file.display());
                std::process::exit(1);
            }
            Job::Send(file.clone())
        }
        Commands::Receive { file, output_dir } => match receive_target(output_dir, file) {
            Ok(target) => Job::Receive { output_dir: output_dir.clone(), target },
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
    };

    let mut transport = match open_link(&cli) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match job {
        Job::Send(file) => {
            log::info!("Sending file: {}", file.display());
            XmodemSender::new(&mut *transport)
                .with_config(config)
                .send_file(&file)
        }
        Job::Receive { output_dir, target } => {
            log::info!("Receiving file: {}", target.display());
            receive(&mut *transport, config, cli.report, &output_dir, &target)
        }
    };

    if let Err(e) = transport.close() {
        log::warn!("Failed to close transport: {}", e);
    }

    match result {
        Ok(true) => println!("OK"),
        Ok(false) => {
            println!("FAIL");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Transfer failed: {}", e);
            println!("FAIL");
            std::process::exit(1);
        }
    }
}

fn receive(
    transport: &mut dyn Transport,
    config: Config,
    report: bool,
    output_dir: &Path,
    target: &Path,
) -> Result<bool, XmodemError> {
    let counter = Arc::new(CountingObserver::new());
    let mut receiver = XmodemReceiver::new(transport).with_config(config);
    if report {
        receiver = receiver.with_observer(counter.clone());
    }

    let result = receiver.receive_file_in(output_dir, target);

    if report {
        counter.log_report();
    }
    result
}
