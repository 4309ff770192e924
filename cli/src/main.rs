//! The `sofi` endpoint: pipes standard input to the speaker and the
//! microphone to standard output, forming one end of an acoustic link.

use std::io::{self, Read, Write};
use std::process::exit;
use std::thread;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use log::{info, LevelFilter};

use sofi_core::{Config, Packet, Sofi, SofiReceiver, SofiSender};

#[derive(Parser)]
#[command(
    name = "sofi",
    about = "Transmit data over sound, reading from standard input and writing to standard output.",
    version
)]
struct Cli {
    /// Run the receiver (enabled by default unless --sender is given)
    #[arg(short = 'R', long)]
    receiver: bool,

    /// Run the sender (enabled by default unless --receiver is given)
    #[arg(short = 'S', long)]
    sender: bool,

    /// Run at BAUD symbols per second
    #[arg(short, long, value_name = "BAUD", default_value_t = 1000.0)]
    baud: f32,

    /// Use the given comma-separated frequencies for symbols, with 2, 4, 16,
    /// or 256 frequencies for a symbol width of 1, 2, 4, or 8, respectively
    #[arg(short, long, value_name = "FREQ0,FREQ1,...", value_delimiter = ',')]
    frequencies: Option<Vec<f32>>,

    /// Set up the audio streams at SAMPLE_RATE
    #[arg(short = 's', long, value_name = "SAMPLE_RATE", default_value_t = 192_000)]
    sample_rate: u32,

    /// Use a window of WINDOW_FACTOR times the symbol duration to detect a
    /// carrier wave
    #[arg(short = 'w', long = "window", value_name = "WINDOW_FACTOR", default_value_t = 0.2)]
    window: f32,

    /// Silence between packets, in symbol durations
    #[arg(short = 'g', long = "gap", value_name = "GAP_FACTOR", default_value_t = 2.0)]
    gap: f32,

    /// Maximum bytes per outgoing packet
    #[arg(
        short = 'l',
        long = "max-length",
        value_name = "BYTES",
        default_value_t = 255,
        value_parser = clap::value_parser!(u8).range(1..)
    )]
    max_length: u8,

    /// Do not close standard output when a zero-length packet is received
    #[arg(short = 'k', long)]
    keep_open: bool,

    /// Transmit and expect packets without the CRC-32 trailer
    #[arg(long)]
    no_checksum: bool,

    /// Increase the debug level by one
    #[arg(short = 'd', action = ArgAction::Count)]
    debug: u8,

    /// Set the debug level to DEBUG_LEVEL
    #[arg(long, value_name = "DEBUG_LEVEL")]
    debug_level: Option<u8>,
}

fn usage_error(message: &str) -> ! {
    let mut cmd = Cli::command();
    let err = cmd.error(ErrorKind::InvalidValue, message);
    let _ = err.print();
    exit(1);
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            exit(code);
        }
    };

    let debug_level = cli.debug_level.unwrap_or(cli.debug);
    env_logger::Builder::new()
        .filter_level(match debug_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .format_timestamp(None)
        .init();

    let (symbol_width, symbol_freqs) = match &cli.frequencies {
        None => (1, vec![2200.0, 1200.0]),
        Some(freqs) => {
            let width = match freqs.len() {
                2 => 1,
                4 => 2,
                16 => 4,
                256 => 8,
                _ => usage_error("symbol width must be 1, 2, 4, or 8"),
            };
            (width, freqs.clone())
        }
    };

    // Neither direction given means both.
    let (sender, receiver) = if !cli.sender && !cli.receiver {
        (true, true)
    } else {
        (cli.sender, cli.receiver)
    };

    let config = Config {
        sample_rate: cli.sample_rate,
        baud: cli.baud,
        symbol_width,
        symbol_freqs,
        recv_window_factor: cli.window,
        interpacket_gap_factor: cli.gap,
        sender,
        receiver,
        checksum: !cli.no_checksum,
        max_packet_length: cli.max_length,
        ..Config::default()
    };
    if let Err(err) = config.validate() {
        usage_error(&err.to_string());
    }

    info!(
        "frequencies: {}",
        config.symbol_freqs[..config.num_symbols()]
            .iter()
            .map(|f| format!("{f:.2} Hz"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut sofi = match Sofi::new(config) {
        Ok(sofi) => sofi,
        Err(err) => {
            eprintln!("sofi: {err}");
            exit(1);
        }
    };

    let max_length = cli.max_length as usize;
    let sender_thread = sofi
        .take_sender()
        .map(|sender| thread::spawn(move || sender_loop(sender, max_length)));

    if let Some(receiver) = sofi.take_receiver() {
        if let Err(err) = receive_loop(&receiver, debug_level, cli.keep_open) {
            eprintln!("sofi: {err}");
            sofi.shutdown();
            exit(1);
        }
        // The peer closed the stream. Flush anything still queued for the
        // speaker and leave; a sender thread still blocked on stdin is
        // abandoned rather than cancelled mid-read.
        sofi.shutdown();
        exit(0);
    }

    // Send-only mode: run until stdin is exhausted.
    let status = match sender_thread.expect("no direction enabled").join() {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            eprintln!("sofi: {err}");
            1
        }
        Err(_) => 1,
    };
    sofi.shutdown();
    exit(status);
}

/// Read stdin in packet-sized chunks and queue them for transmission. An
/// empty read means end of stream: emit one zero-length packet and wait for
/// the air to clear.
fn sender_loop(mut sender: SofiSender, max_length: usize) -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut buf = vec![0u8; max_length];
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let packet =
            Packet::new(&buf[..n]).expect("stdin chunk exceeds packet capacity");
        sender.send(&packet);
        if n == 0 {
            break;
        }
    }
    sender.drain();
    Ok(())
}

/// Write received payloads to stdout, flushing after each packet. A
/// zero-length packet ends the stream unless --keep-open was given.
fn receive_loop(receiver: &SofiReceiver, debug_level: u8, keep_open: bool) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    loop {
        let packet = receiver.recv();
        if debug_level == 0 {
            stdout.write_all(packet.payload())?;
            stdout.flush()?;
        } else if !packet.is_empty() || debug_level >= 2 {
            // Debug mode: show the packet structure instead of raw bytes.
            writeln!(stdout, "{packet:?}")?;
            stdout.flush()?;
        }
        if packet.is_empty() && !keep_open {
            return Ok(());
        }
    }
}
