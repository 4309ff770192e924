//! Offline harness: render packets to a WAV file and decode them back,
//! exercising the modem end to end without a sound card.
//!
//! Usage:
//!   sofi-wav encode INPUT OUTPUT.WAV
//!   sofi-wav decode INPUT.WAV OUTPUT

use std::env;
use std::process::exit;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use sofi_core::demod::Demodulator;
use sofi_core::modulator::Modulator;
use sofi_core::queue::RecvQueue;
use sofi_core::{frame, ring, Config, Packet};

fn usage() -> ! {
    eprintln!("Usage: sofi-wav encode INPUT OUTPUT.WAV");
    eprintln!("       sofi-wav decode INPUT.WAV OUTPUT");
    exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        usage();
    }
    let result = match args[1].as_str() {
        "encode" => encode(&args[2], &args[3]),
        "decode" => decode(&args[2], &args[3]),
        _ => usage(),
    };
    if let Err(err) = result {
        eprintln!("sofi-wav: {err}");
        exit(1);
    }
}

fn encode(input: &str, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let data = std::fs::read(input)?;
    println!("Read {} bytes from {input}", data.len());

    let (mut msg_tx, msg_rx) = ring::channel(sofi_core::SENDER_RING_SLOTS);
    let idle = Arc::new(AtomicBool::new(true));
    let mut modulator = Modulator::new(&config, msg_rx, idle);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;

    let mut total = 0usize;
    let mut chunk = [0.0f32; 1024];
    for payload in data.chunks(config.max_packet_length as usize).chain(
        // Trailing zero-length packet marks end of stream, as on the air.
        std::iter::once(&[][..]),
    ) {
        let packet = Packet::new(payload)?;
        let msg = frame::serialize(&packet, config.symbol_width, config.checksum);
        assert!(msg_tx.push(msg));
        loop {
            modulator.fill(&mut chunk);
            for &sample in &chunk {
                let clamped = sample.clamp(-1.0, 1.0);
                writer.write_sample((clamped * 32767.0) as i16)?;
            }
            total += chunk.len();
            if modulator.is_idle() && msg_tx.is_empty() {
                break;
            }
        }
    }
    writer.finalize()?;

    println!(
        "Wrote {total} samples ({:.2}s) to {output}",
        total as f32 / config.sample_rate as f32
    );
    Ok(())
}

fn decode(input: &str, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(input)?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(format!("expected mono input, got {} channels", spec.channels).into());
    }
    println!(
        "Read WAV: {} Hz, {} bits",
        spec.sample_rate, spec.bits_per_sample
    );

    let config = Config {
        sample_rate: spec.sample_rate,
        ..Config::default()
    };
    config.validate()?;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
    };
    println!("Extracted {} samples", samples.len());

    let (mut sample_tx, sample_rx) = ring::channel(1 << 16);
    let queue = Arc::new(RecvQueue::new(sofi_core::RECV_QUEUE_CAP));
    let mut demodulator = Demodulator::new(Arc::new(config.clone()), sample_rx, queue.clone());

    let mut decoded = Vec::new();
    let mut done = false;
    let mut feed = |chunk: &[f32], decoded: &mut Vec<u8>, done: &mut bool| {
        let mut offset = 0;
        while offset < chunk.len() {
            offset += sample_tx.write(&chunk[offset..]);
            while demodulator.poll() {}
            while let Some(msg) = queue.try_pop() {
                match frame::deserialize(
                    &msg,
                    config.symbol_width,
                    config.checksum,
                    config.max_packet_length,
                ) {
                    Ok(packet) if packet.is_empty() => *done = true,
                    Ok(packet) => decoded.extend_from_slice(packet.payload()),
                    Err(_) => eprintln!("dropped corrupt packet"),
                }
            }
        }
    };
    for chunk in samples.chunks(4096) {
        feed(chunk, &mut decoded, &mut done);
    }
    // Flush: enough trailing silence to terminate a burst cut short by the
    // end of the file.
    let tail = vec![0.0f32; 2 * config.samples_per_symbol()];
    feed(&tail, &mut decoded, &mut done);

    if !done {
        eprintln!("warning: no end-of-stream packet found");
    }
    std::fs::write(output, &decoded)?;
    println!("Wrote {} bytes to {output}", decoded.len());
    Ok(())
}
