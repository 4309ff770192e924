//! FSK demodulator: sliding tone detection plus the carrier-sensing state
//! machine that reassembles packets.
//!
//! The worker consumes non-overlapping windows from the sample ring. While
//! listening it uses a sub-symbol window so carrier onset is caught quickly;
//! once a tone appears it switches to one-symbol windows and collects symbols
//! until a silent window marks the end of the burst. Window boundaries are
//! the only timing quantization on the receive side; there is no PLL, and
//! the residual misalignment stays below one listen window.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, log_enabled, trace, Level};

use crate::frame::RawMessage;
use crate::queue::RecvQueue;
use crate::ring::Consumer;
use crate::{Config, MAX_MSG_SYMBOLS};

const TWO_PI: f32 = 2.0 * PI;

/// Correlate a window against each symbol tone and pick the strongest.
///
/// For symbol value `k` this computes the quadrature pair
/// `S = Σ x[j] sin(2π F[k] j / rate)`, `C = Σ x[j] cos(2π F[k] j / rate)`
/// and the strength `S² + C²` (a single DFT bin, Goertzel-style). Returns
/// the strongest symbol if it beats the silence floor, `None` otherwise;
/// ties go to the lowest symbol value.
pub fn detect_symbol(window: &[f32], config: &Config) -> Option<u8> {
    let mut strengths = log_enabled!(Level::Trace).then(Vec::new);

    let mut symbol = None;
    let mut max_strength = config.silence_threshold;
    for (value, &freq) in config.symbol_freqs[..config.num_symbols()]
        .iter()
        .enumerate()
    {
        let omega = TWO_PI * freq / config.sample_rate as f32;
        let mut sin_sum = 0.0f32;
        let mut cos_sum = 0.0f32;
        for (j, &x) in window.iter().enumerate() {
            let angle = omega * j as f32;
            sin_sum += angle.sin() * x;
            cos_sum += angle.cos() * x;
        }
        let strength = sin_sum * sin_sum + cos_sum * cos_sum;
        if strength > max_strength {
            max_strength = strength;
            symbol = Some(value as u8);
        }
        if let Some(strengths) = &mut strengths {
            strengths.push(strength);
        }
    }

    if let Some(strengths) = strengths {
        trace!("symbol strengths = {strengths:?} -> {symbol:?}");
    }
    symbol
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    Listen,
    Demodulate,
}

/// Carrier-sensing state machine feeding the receive queue.
///
/// A run of detected tones delimited by silence on both sides is one
/// message; the sender's inter-packet gap provides the terminating silence.
pub struct Demodulator {
    config: Arc<Config>,
    rx: Consumer<f32>,
    queue: Arc<RecvQueue>,
    state: RecvState,
    msg: RawMessage,
    window: Vec<f32>,
}

impl Demodulator {
    pub fn new(config: Arc<Config>, rx: Consumer<f32>, queue: Arc<RecvQueue>) -> Self {
        let window = vec![0.0f32; config.samples_per_symbol().max(config.listen_window())];
        Self {
            config,
            rx,
            queue,
            state: RecvState::Listen,
            msg: RawMessage::default(),
            window,
        }
    }

    fn window_size(&self) -> usize {
        match self.state {
            RecvState::Listen => self.config.listen_window(),
            RecvState::Demodulate => self.config.samples_per_symbol(),
        }
    }

    /// Process one window if the sample ring holds enough input. Returns
    /// false when the ring is short and the caller should wait for more
    /// audio.
    pub fn poll(&mut self) -> bool {
        let window_size = self.window_size();
        if self.rx.read_available() < window_size {
            return false;
        }
        let n = self.rx.read(&mut self.window[..window_size]);
        debug_assert_eq!(n, window_size);

        let symbol = detect_symbol(&self.window[..window_size], &self.config);
        match self.state {
            RecvState::Listen => {
                if symbol.is_some() {
                    // Carrier onset: the sub-symbol hit only marks the start;
                    // the symbols themselves come from the full windows that
                    // follow.
                    self.msg = RawMessage::default();
                    self.state = RecvState::Demodulate;
                    debug!("-> DEMODULATE");
                }
            }
            RecvState::Demodulate => match symbol {
                None => {
                    self.queue.push(&self.msg);
                    self.state = RecvState::Listen;
                    debug!("-> LISTEN");
                }
                Some(symbol) => {
                    if self.msg.len < MAX_MSG_SYMBOLS {
                        self.msg.symbols[self.msg.len] = symbol;
                        self.msg.len += 1;
                    }
                }
            },
        }
        true
    }

    /// Worker loop: poll until told to stop, sleeping roughly one window
    /// whenever the ring runs short.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            if !self.poll() {
                let seconds = self.window_size() as f32 / self.config.sample_rate as f32;
                thread::sleep(Duration::from_secs_f32(seconds));
            }
        }
    }
}
