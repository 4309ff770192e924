//! Endpoint lifecycle: construction, send/receive handles, shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::bridge::AudioBridge;
use crate::demod::Demodulator;
use crate::error::{Result, SofiError};
use crate::frame::{self, Packet, RawMessage};
use crate::modulator::Modulator;
use crate::queue::RecvQueue;
use crate::ring::{self, Producer, SpscRing};
use crate::{Config, RECV_QUEUE_CAP, SENDER_RING_SLOTS};

/// A running modem endpoint.
///
/// Owns the audio streams and the demodulator worker. The actual data plane
/// is reached through [`SofiSender`] and [`SofiReceiver`], which are `Send`
/// and can be moved to worker threads; the endpoint itself must stay on the
/// thread that created it (the audio streams are not `Send`).
pub struct Sofi {
    config: Arc<Config>,
    _bridge: AudioBridge,
    msg_ring: Option<Arc<SpscRing<RawMessage>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sender: Option<SofiSender>,
    receiver: Option<SofiReceiver>,
}

impl Sofi {
    /// Validate the configuration, build the rings and queue, open and
    /// start the audio streams, and spawn the demodulator worker. On any
    /// failure everything constructed so far is torn down again.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let idle = Arc::new(AtomicBool::new(true));

        let (modulator, sender, msg_ring) = if config.sender {
            let (tx, rx) = ring::channel(SENDER_RING_SLOTS);
            let shared = tx.shared();
            let modulator = Modulator::new(&config, rx, idle.clone());
            let sender = SofiSender {
                config: config.clone(),
                tx,
            };
            (Some(modulator), Some(sender), Some(shared))
        } else {
            (None, None, None)
        };

        let (sample_tx, demodulator, receiver) = if config.receiver {
            // At least one second of audio, so scheduling hiccups in the
            // worker never push back into the callback.
            let capacity = (config.sample_rate as usize).next_power_of_two();
            let (tx, rx) = ring::channel(capacity);
            let queue = Arc::new(RecvQueue::new(RECV_QUEUE_CAP));
            let demodulator = Demodulator::new(config.clone(), rx, queue.clone());
            let receiver = SofiReceiver {
                config: config.clone(),
                queue,
            };
            (Some(tx), Some(demodulator), Some(receiver))
        } else {
            (None, None, None)
        };

        let bridge = AudioBridge::start(&config, modulator, sample_tx, idle)?;

        let worker = match demodulator {
            Some(mut demodulator) => {
                let shutdown = shutdown.clone();
                let handle = thread::Builder::new()
                    .name("sofi-demod".into())
                    .spawn(move || demodulator.run(&shutdown))
                    .map_err(|e| SofiError::Worker(e.to_string()))?;
                Some(handle)
            }
            None => None,
        };

        info!(
            "sample rate {} Hz, {} baud, {} samples/symbol, {}-sample window",
            config.sample_rate,
            config.baud,
            config.samples_per_symbol(),
            config.listen_window()
        );

        Ok(Self {
            config,
            _bridge: bridge,
            msg_ring,
            shutdown,
            worker,
            sender,
            receiver,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hand out the sending half. Only one exists per endpoint.
    pub fn take_sender(&mut self) -> Option<SofiSender> {
        self.sender.take()
    }

    /// Hand out the receiving half. Only one exists per endpoint.
    pub fn take_receiver(&mut self) -> Option<SofiReceiver> {
        self.receiver.take()
    }

    /// Stop the endpoint: join the demodulator worker, wait for queued
    /// output to finish playing, then close the streams.
    pub fn shutdown(mut self) {
        self.shutdown_impl();
    }

    fn shutdown_impl(&mut self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(msg_ring) = &self.msg_ring {
            let byte_time = byte_sleep(&self.config);
            while msg_ring.read_available() > 0 {
                thread::sleep(byte_time);
            }
            // Slack for the final audio block still in flight in the host.
            thread::sleep(Duration::from_millis(100));
        }
        debug!("endpoint stopped");
    }
}

impl Drop for Sofi {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

/// Sleep granularity for the sender's spin loops: one byte of air time.
fn byte_sleep(config: &Config) -> Duration {
    Duration::from_millis((8.0 * 1000.0 / config.baud).ceil().max(1.0) as u64)
}

/// Sending half of an endpoint.
pub struct SofiSender {
    config: Arc<Config>,
    tx: Producer<RawMessage>,
}

impl SofiSender {
    /// Queue a packet for transmission. Blocks until the message ring has
    /// room, but does not wait for the packet to reach the air.
    pub fn send(&mut self, packet: &Packet) {
        let msg = frame::serialize(packet, self.config.symbol_width, self.config.checksum);
        let wait = byte_sleep(&self.config);
        while !self.tx.push(msg) {
            thread::sleep(wait);
        }
    }

    /// Block until every queued message has been played out.
    pub fn drain(&self) {
        let wait = byte_sleep(&self.config);
        while !self.tx.is_empty() {
            thread::sleep(wait);
        }
    }
}

/// Receiving half of an endpoint.
pub struct SofiReceiver {
    config: Arc<Config>,
    queue: Arc<RecvQueue>,
}

impl SofiReceiver {
    /// Block until a valid packet arrives. Corrupt packets (checksum
    /// mismatch) are dropped here without surfacing.
    pub fn recv(&self) -> Packet {
        loop {
            let msg = self.queue.pop();
            match self.decode(&msg) {
                Some(packet) => return packet,
                None => debug!("dropped corrupt packet"),
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<Packet> {
        loop {
            let msg = self.queue.try_pop()?;
            if let Some(packet) = self.decode(&msg) {
                return Some(packet);
            }
            debug!("dropped corrupt packet");
        }
    }

    fn decode(&self, msg: &RawMessage) -> Option<Packet> {
        frame::deserialize(
            msg,
            self.config.symbol_width,
            self.config.checksum,
            self.config.max_packet_length,
        )
        .ok()
    }
}
