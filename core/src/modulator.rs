//! FSK modulator: drains raw messages from the sender ring and synthesizes
//! the output waveform, one sample at a time, inside the audio callback.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::frame::RawMessage;
use crate::ring::Consumer;
use crate::Config;

const TWO_PI: f32 = 2.0 * PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    Transmitting,
    InterpacketGap,
}

/// Sample generator driven by the realtime output callback.
///
/// The oscillator phase is carried across symbol boundaries; only the phase
/// increment changes when the symbol does. Restarting the phase per symbol
/// would splatter energy across the band and confuse the tone detector.
///
/// [`fill`](Self::fill) never blocks or allocates: the current message stays
/// in its ring slot while it drains and the slot is released after the
/// inter-packet gap.
pub struct Modulator {
    rx: Consumer<RawMessage>,
    idle: Arc<AtomicBool>,
    state: SendState,
    index: usize,
    symbol: u8,
    frame: u32,
    phase: f32,
    samples_per_symbol: u32,
    gap_frames: u32,
    /// Per-symbol phase increments, `2π * freq / sample_rate`.
    steps: Box<[f32]>,
}

impl Modulator {
    pub fn new(config: &Config, rx: Consumer<RawMessage>, idle: Arc<AtomicBool>) -> Self {
        let steps = config.symbol_freqs[..config.num_symbols()]
            .iter()
            .map(|&freq| TWO_PI * freq / config.sample_rate as f32)
            .collect();
        idle.store(true, Ordering::Relaxed);
        Self {
            rx,
            idle,
            state: SendState::Idle,
            index: 0,
            symbol: 0,
            frame: 0,
            phase: 0.0,
            samples_per_symbol: config.samples_per_symbol() as u32,
            gap_frames: config.gap_samples() as u32,
            steps,
        }
    }

    /// True while no transmission (burst or gap) is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == SendState::Idle
    }

    /// Fill an output buffer. Silence while idle; otherwise the continuous
    /// FSK burst followed by the inter-packet gap.
    pub fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }

    fn next_sample(&mut self) -> f32 {
        match self.state {
            SendState::Idle => {
                let first = match self.rx.peek() {
                    None => return 0.0,
                    Some(msg) if msg.len == 0 => None,
                    Some(msg) => Some(msg.symbols[0]),
                };
                let Some(symbol) = first else {
                    // Degenerate empty message: nothing to play, drop it.
                    self.rx.advance(1);
                    return 0.0;
                };
                self.symbol = symbol;
                self.index = 1;
                self.frame = 0;
                self.state = SendState::Transmitting;
                self.idle.store(false, Ordering::Relaxed);
                self.tone_sample()
            }
            SendState::Transmitting => {
                self.frame += 1;
                if self.frame < self.samples_per_symbol {
                    return self.tone_sample();
                }
                self.frame = 0;
                let next = self
                    .rx
                    .peek()
                    .filter(|msg| self.index < msg.len)
                    .map(|msg| msg.symbols[self.index]);
                match next {
                    Some(symbol) => {
                        self.symbol = symbol;
                        self.index += 1;
                        self.tone_sample()
                    }
                    None => {
                        self.state = SendState::InterpacketGap;
                        0.0
                    }
                }
            }
            SendState::InterpacketGap => {
                self.frame += 1;
                if self.frame >= self.gap_frames {
                    self.rx.advance(1);
                    self.state = SendState::Idle;
                    self.idle.store(true, Ordering::Relaxed);
                }
                0.0
            }
        }
    }

    fn tone_sample(&mut self) -> f32 {
        let out = self.phase.sin();
        self.phase += self.steps[self.symbol as usize];
        while self.phase >= TWO_PI {
            self.phase -= TWO_PI;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{serialize, Packet};
    use crate::ring;

    fn test_config() -> Config {
        Config {
            sample_rate: 48_000,
            baud: 100.0,
            checksum: false,
            ..Config::default()
        }
    }

    fn modulator(config: &Config) -> (ring::Producer<RawMessage>, Modulator) {
        let (tx, rx) = ring::channel(crate::SENDER_RING_SLOTS);
        let idle = Arc::new(AtomicBool::new(true));
        (tx, Modulator::new(config, rx, idle))
    }

    fn raw(symbols: &[u8]) -> RawMessage {
        let mut msg = RawMessage::default();
        msg.symbols[..symbols.len()].copy_from_slice(symbols);
        msg.len = symbols.len();
        msg
    }

    #[test]
    fn test_silence_while_idle() {
        let config = test_config();
        let (_tx, mut modulator) = modulator(&config);
        let mut out = vec![1.0f32; 4096];
        modulator.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(modulator.is_idle());
    }

    #[test]
    fn test_silence_after_burst_drains() {
        let config = test_config();
        let (mut tx, mut modulator) = modulator(&config);
        assert!(tx.push(raw(&[0; 8])));

        // 8 symbols plus gap, then some slack.
        let total = 8 * config.samples_per_symbol() + config.gap_samples() + 1000;
        let mut out = vec![0.0f32; total];
        modulator.fill(&mut out);

        assert!(modulator.is_idle());
        assert!(tx.is_empty(), "slot not released after gap");
        assert!(out[total - 1000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_phase_continuous_across_symbol_change() {
        let config = test_config();
        let (mut tx, mut modulator) = modulator(&config);
        // Alternating symbols: the frequency switches every symbol but the
        // waveform must stay sample-to-sample smooth.
        assert!(tx.push(raw(&[0, 1, 0, 1, 0, 1, 0, 1])));

        let tone_len = 8 * config.samples_per_symbol();
        let mut out = vec![0.0f32; tone_len];
        modulator.fill(&mut out);

        let max_step = config.symbol_freqs[0].max(config.symbol_freqs[1]) * TWO_PI
            / config.sample_rate as f32;
        for i in 0..tone_len - 1 {
            let jump = (out[i + 1] - out[i]).abs();
            assert!(
                jump <= max_step * 1.01,
                "discontinuity at sample {i}: jump {jump}"
            );
        }
    }

    #[test]
    fn test_single_tone_matches_reference() {
        let config = test_config();
        let (mut tx, mut modulator) = modulator(&config);
        // All symbols identical: the output must be one continuous sine at
        // symbol_freqs[1], indistinguishable from an unbroken oscillator.
        assert!(tx.push(raw(&[1; 16])));

        let tone_len = 16 * config.samples_per_symbol();
        let mut out = vec![0.0f32; tone_len];
        modulator.fill(&mut out);

        let step = TWO_PI as f64 * config.symbol_freqs[1] as f64 / config.sample_rate as f64;
        for (i, &sample) in out.iter().enumerate() {
            let expected = (i as f64 * step).sin() as f32;
            assert!(
                (sample - expected).abs() < 1e-3,
                "sample {i}: got {sample}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_burst_length_hi_packet() {
        // "hi" at one bit per symbol is 24 symbols of tone, then the gap.
        let config = test_config();
        let (mut tx, mut modulator) = modulator(&config);
        let msg = serialize(&Packet::new(b"hi").unwrap(), 1, false);
        assert_eq!(msg.len, 24);
        assert!(tx.push(msg));

        let expected = 24 * config.samples_per_symbol();
        let mut out = vec![0.0f32; expected + config.gap_samples() + 256];
        modulator.fill(&mut out);

        let last_tone = out
            .iter()
            .rposition(|&s| s.abs() > 1e-6)
            .expect("no tone emitted");
        assert!(
            last_tone < expected && last_tone >= expected - 3,
            "burst ends at sample {last_tone}, expected about {expected}"
        );
    }

    #[test]
    fn test_back_to_back_messages_separated_by_gap() {
        let config = test_config();
        let (mut tx, mut modulator) = modulator(&config);
        assert!(tx.push(raw(&[0; 8])));
        assert!(tx.push(raw(&[1; 8])));

        let symbol = config.samples_per_symbol();
        let gap = config.gap_samples();
        let mut out = vec![0.0f32; 2 * (8 * symbol + gap) + 64];
        modulator.fill(&mut out);

        // The gap between the bursts must be entirely silent.
        let gap_region = &out[8 * symbol..8 * symbol + gap];
        assert!(gap_region.iter().all(|&s| s == 0.0));
        // And the second burst must actually appear.
        let second = &out[8 * symbol + gap..8 * symbol + gap + symbol];
        assert!(second.iter().any(|&s| s.abs() > 0.1));
        assert!(tx.is_empty());
    }
}
