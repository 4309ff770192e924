//! End-to-end loopback: modulator output piped straight into the
//! demodulator's sample ring, bypassing the audio hardware.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use sofi_core::demod::Demodulator;
use sofi_core::frame;
use sofi_core::modulator::Modulator;
use sofi_core::queue::RecvQueue;
use sofi_core::ring;
use sofi_core::{Config, Packet};

/// Deterministic LCG, good enough for test payloads and noise.
struct Lcg(u32);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1664525).wrapping_add(1013904223);
        self.0
    }

    fn next_byte(&mut self) -> u8 {
        (self.next_u32() >> 24) as u8
    }

    fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Box-Muller transform.
    fn next_gaussian(&mut self) -> f32 {
        let u1 = self.next_f32().max(1e-9);
        let u2 = self.next_f32();
        (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
    }
}

/// A modulator/demodulator pair wired back to back through a sample ring.
struct Link {
    config: Config,
    msg_tx: ring::Producer<frame::RawMessage>,
    modulator: Modulator,
    sample_tx: ring::Producer<f32>,
    demodulator: Demodulator,
    queue: Arc<RecvQueue>,
}

impl Link {
    fn new(config: Config) -> Self {
        let shared = Arc::new(config.clone());
        let (msg_tx, msg_rx) = ring::channel(2);
        let idle = Arc::new(AtomicBool::new(true));
        let modulator = Modulator::new(&config, msg_rx, idle);
        let (sample_tx, sample_rx) = ring::channel(1 << 16);
        let queue = Arc::new(RecvQueue::new(32));
        let demodulator = Demodulator::new(shared, sample_rx, queue.clone());
        Self {
            config,
            msg_tx,
            modulator,
            sample_tx,
            demodulator,
            queue,
        }
    }

    /// Render one packet (burst plus trailing gap) to samples.
    fn modulate(&mut self, packet: &Packet) -> Vec<f32> {
        let msg = frame::serialize(packet, self.config.symbol_width, self.config.checksum);
        assert!(self.msg_tx.push(msg));
        let mut samples = Vec::new();
        let mut chunk = [0.0f32; 512];
        loop {
            self.modulator.fill(&mut chunk);
            samples.extend_from_slice(&chunk);
            if self.modulator.is_idle() && self.msg_tx.is_empty() {
                return samples;
            }
        }
    }

    /// Feed samples through the demodulator, collecting decoded packets.
    fn demodulate(&mut self, samples: &[f32], out: &mut Vec<Packet>) {
        let mut offset = 0;
        while offset < samples.len() {
            offset += self.sample_tx.write(&samples[offset..]);
            while self.demodulator.poll() {}
            self.drain(out);
        }
        while self.demodulator.poll() {}
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<Packet>) {
        while let Some(msg) = self.queue.try_pop() {
            if let Ok(packet) = frame::deserialize(
                &msg,
                self.config.symbol_width,
                self.config.checksum,
                self.config.max_packet_length,
            ) {
                out.push(packet);
            }
        }
    }

    fn roundtrip(&mut self, packet: &Packet) -> Vec<Packet> {
        let samples = self.modulate(packet);
        let mut out = Vec::new();
        self.demodulate(&samples, &mut out);
        out
    }
}

/// A 48 kHz / 300 baud configuration that keeps the tests quick while the
/// listen window still clears the silence floor comfortably.
fn fast_config() -> Config {
    Config {
        sample_rate: 48_000,
        baud: 300.0,
        ..Config::default()
    }
}

#[test]
fn test_loopback_clean_channel() {
    let mut link = Link::new(fast_config());
    for payload in [&b"x"[..], b"hello", b"The quick brown fox jumps over the lazy dog"] {
        let packet = Packet::new(payload).unwrap();
        let received = link.roundtrip(&packet);
        assert_eq!(received, vec![packet], "failed for {payload:?}");
    }
}

#[test]
fn test_loopback_64_random_bytes_at_192k() {
    // W=1, 1000 baud, 192 kHz: byte-identical recovery of a random payload.
    let mut link = Link::new(Config::default());
    let mut rng = Lcg(0xDEAD_BEEF);
    let payload: Vec<u8> = (0..64).map(|_| rng.next_byte()).collect();
    let packet = Packet::new(&payload).unwrap();
    let received = link.roundtrip(&packet);
    assert_eq!(received, vec![packet]);
}

#[test]
fn test_loopback_empty_packet() {
    let mut link = Link::new(fast_config());
    let received = link.roundtrip(&Packet::empty());
    assert_eq!(received.len(), 1);
    assert!(received[0].is_empty());
}

#[test]
fn test_loopback_all_symbol_widths() {
    let cases: [(u8, Vec<f32>, u32); 4] = [
        (1, vec![2200.0, 1200.0], 48_000),
        (2, vec![2400.0, 1200.0, 4800.0, 3600.0], 48_000),
        // 16 tones, 400 Hz apart.
        (4, (0..16).map(|k| 1000.0 + 400.0 * k as f32).collect(), 48_000),
        // 256 tones need the wide band of the 192 kHz rate to stay a full
        // baud apart.
        (8, (0..256).map(|k| 2000.0 + 300.0 * k as f32).collect(), 192_000),
    ];
    for (width, freqs, rate) in cases {
        let config = Config {
            sample_rate: rate,
            baud: 300.0,
            symbol_width: width,
            symbol_freqs: freqs,
            ..Config::default()
        };
        let mut link = Link::new(config);
        let packet = Packet::new(b"W?").unwrap();
        let received = link.roundtrip(&packet);
        assert_eq!(received, vec![packet], "failed at width {width}");
    }
}

#[test]
fn test_loopback_noise_20db_packet_error_rate() {
    // SNR 20 dB against the unit-amplitude carrier (power 0.5): noise
    // variance 0.005. Packet error rate must stay at or below 1%.
    const PACKETS: usize = 1000;
    const PAYLOAD: usize = 8;
    let sigma = (0.5f32 / 100.0).sqrt();

    let mut link = Link::new(fast_config());
    let mut rng = Lcg(0x5EED_1234);
    let mut delivered = 0usize;
    let mut received = Vec::new();

    for seq in 0..PACKETS {
        let mut payload = vec![0u8; PAYLOAD];
        payload[0] = (seq & 0xFF) as u8;
        payload[1] = (seq >> 8) as u8;
        for byte in &mut payload[2..] {
            *byte = rng.next_byte();
        }
        let packet = Packet::new(&payload).unwrap();
        let mut samples = link.modulate(&packet);
        for sample in &mut samples {
            *sample += sigma * rng.next_gaussian();
        }
        received.clear();
        link.demodulate(&samples, &mut received);
        if received.len() == 1 && received[0] == packet {
            delivered += 1;
        }
    }

    assert!(
        delivered >= PACKETS - PACKETS / 100,
        "packet error rate too high: {}/{PACKETS} delivered",
        delivered
    );
}

#[test]
fn test_corrupt_burst_dropped_next_delivered() {
    // Overwrite one symbol of the first burst with the other tone: its
    // checksum fails and it is dropped, while the following packet still
    // arrives intact and in order.
    let config = fast_config();
    let symbol_len = config.samples_per_symbol();
    let mut link = Link::new(config.clone());

    let first = Packet::new(b"to be corrupted!").unwrap();
    let second = Packet::new(b"survivor").unwrap();
    let mut samples = link.modulate(&first);

    // Symbol 41 carries bit 1 of payload byte 4 ('e' = 0x65), which is 0;
    // overwriting it with the tone for symbol 1 flips the bit.
    let target = 41 * symbol_len..42 * symbol_len;
    let step = std::f32::consts::TAU * config.symbol_freqs[1] / config.sample_rate as f32;
    for (j, i) in target.enumerate() {
        samples[i] = (j as f32 * step).sin();
    }
    samples.extend(link.modulate(&second));

    let mut received = Vec::new();
    link.demodulate(&samples, &mut received);
    assert_eq!(received, vec![second]);
}
