//! Acoustic FSK modem: transmit byte streams between machines as audible sound.
//!
//! Data is framed into length-prefixed packets, expanded into M-ary FSK symbols,
//! and played out as a continuous-phase sine burst; the receiver runs a sliding
//! Goertzel-style tone detector over microphone input and frames packets on the
//! silence between bursts.
//!
//! The realtime audio callbacks never block, allocate, or lock: all state
//! crossing the callback boundary goes through single-producer/single-consumer
//! ring buffers ([`ring`]).

pub mod bridge;
pub mod demod;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod modulator;
pub mod queue;
pub mod ring;

pub use endpoint::{Sofi, SofiReceiver, SofiSender};
pub use error::{Result, SofiError};
pub use frame::{Packet, RawMessage};

/// Maximum payload bytes per packet (the length prefix is a single byte).
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bytes of CRC-32 trailer appended to a serialized packet when checksumming
/// is enabled.
pub const CRC_LEN: usize = 4;

/// Maximum symbols in a raw message: a full packet plus checksum at the
/// narrowest symbol width (1 bit per symbol).
pub const MAX_MSG_SYMBOLS: usize = (1 + MAX_PAYLOAD + CRC_LEN) * 8;

/// Message ring capacity in packets. Two slots: one draining, one queued.
pub const SENDER_RING_SLOTS: usize = 2;

/// Received-packet queue capacity. Overflowing packets are dropped.
pub const RECV_QUEUE_CAP: usize = 32;

/// Modem configuration. Built once, validated by [`Sofi::new`], immutable
/// afterwards; every component receives a shared reference at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio stream rate in Hz.
    pub sample_rate: u32,
    /// Symbols per second transmitted and expected.
    pub baud: f32,
    /// Bits per symbol: 1, 2, 4, or 8.
    pub symbol_width: u8,
    /// Carrier frequency in Hz for each symbol value; must hold at least
    /// `2^symbol_width` entries, distinguishable at `baud` Hz resolution.
    pub symbol_freqs: Vec<f32>,
    /// Listen-mode window length as a fraction of the symbol duration.
    pub recv_window_factor: f32,
    /// Silence between packets, in symbol durations.
    pub interpacket_gap_factor: f32,
    /// Enable the send direction.
    pub sender: bool,
    /// Enable the receive direction.
    pub receiver: bool,
    /// Append and verify a CRC-32 over `len || payload`.
    pub checksum: bool,
    /// Cap on received payload length; bytes beyond it are discarded.
    pub max_packet_length: u8,
    /// Tone detector floor: windows whose strongest correlation does not
    /// exceed this are treated as silence.
    pub silence_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 192_000,
            baud: 1000.0,
            symbol_width: 1,
            symbol_freqs: vec![2200.0, 1200.0],
            recv_window_factor: 0.2,
            interpacket_gap_factor: 2.0,
            sender: true,
            receiver: true,
            checksum: true,
            max_packet_length: u8::MAX,
            silence_threshold: 100.0,
        }
    }
}

impl Config {
    /// Number of distinct symbols, `2^symbol_width`.
    pub fn num_symbols(&self) -> usize {
        1 << self.symbol_width
    }

    /// Symbols needed to carry one byte.
    pub fn symbols_per_byte(&self) -> usize {
        8 / self.symbol_width as usize
    }

    /// Samples per transmitted symbol, `round(sample_rate / baud)`.
    pub fn samples_per_symbol(&self) -> usize {
        (self.sample_rate as f32 / self.baud).round() as usize
    }

    /// Listen-mode window size in samples; sub-symbol so carrier onset is
    /// detected quickly.
    pub fn listen_window(&self) -> usize {
        (self.recv_window_factor * self.sample_rate as f32 / self.baud).round() as usize
    }

    /// Inter-packet gap length in samples.
    pub fn gap_samples(&self) -> usize {
        (self.interpacket_gap_factor / self.baud * self.sample_rate as f32).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SofiError::InvalidConfig("sample rate must be positive".into()));
        }
        if !(self.baud >= 1.0) {
            return Err(SofiError::InvalidConfig("baud must be >= 1".into()));
        }
        if !matches!(self.symbol_width, 1 | 2 | 4 | 8) {
            return Err(SofiError::InvalidConfig(
                "symbol width must be 1, 2, 4, or 8".into(),
            ));
        }
        if self.symbol_freqs.len() < self.num_symbols() {
            return Err(SofiError::InvalidConfig(format!(
                "need {} symbol frequencies, got {}",
                self.num_symbols(),
                self.symbol_freqs.len()
            )));
        }
        if self.symbol_freqs.iter().any(|&f| !(f > 0.0)) {
            return Err(SofiError::InvalidConfig(
                "symbol frequencies must be positive".into(),
            ));
        }
        if !(self.recv_window_factor > 0.0) {
            return Err(SofiError::InvalidConfig(
                "receiver window factor must be positive".into(),
            ));
        }
        if !(self.interpacket_gap_factor >= 1.0) {
            return Err(SofiError::InvalidConfig(
                "inter-packet gap factor must be >= 1".into(),
            ));
        }
        if self.max_packet_length == 0 {
            return Err(SofiError::InvalidConfig(
                "max packet length must be >= 1".into(),
            ));
        }
        if !self.sender && !self.receiver {
            return Err(SofiError::InvalidConfig(
                "at least one of sender and receiver must be enabled".into(),
            ));
        }
        if self.listen_window() == 0 {
            return Err(SofiError::InvalidConfig(
                "receiver window rounds to zero samples".into(),
            ));
        }
        Ok(())
    }
}
