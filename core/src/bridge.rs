//! Realtime audio plumbing: owns the host streams and routes the callbacks.
//!
//! The output callback runs the modulator; the input callback copies
//! captured samples into the receiver's sample ring, but only while the
//! modulator is idle — on a shared device this keeps the endpoint's own
//! transmission from echoing straight back into its demodulator. Neither
//! callback blocks, allocates, or takes a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use log::error;

use crate::error::{Result, SofiError};
use crate::modulator::Modulator;
use crate::ring::Producer;
use crate::Config;

/// Holder for the running host streams. Dropping it stops playback and
/// capture. `cpal::Stream` is not `Send`, so the bridge (and the endpoint
/// handle that owns it) stays on the thread that built it.
pub struct AudioBridge {
    _output: Option<cpal::Stream>,
    _input: Option<cpal::Stream>,
}

impl AudioBridge {
    /// Open and start the configured directions on the default devices,
    /// mono f32 at the configured rate.
    pub fn start(
        config: &Config,
        modulator: Option<Modulator>,
        sample_tx: Option<Producer<f32>>,
        idle: Arc<AtomicBool>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let output = match modulator {
            Some(mut modulator) => {
                let device = host
                    .default_output_device()
                    .ok_or(SofiError::NoDevice("output"))?;
                let stream = device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            modulator.fill(data);
                        },
                        |err| error!("output stream error: {err}"),
                        None,
                    )
                    .map_err(|e| SofiError::AudioStream(e.to_string()))?;
                stream
                    .play()
                    .map_err(|e| SofiError::AudioStream(e.to_string()))?;
                Some(stream)
            }
            None => None,
        };

        let input = match sample_tx {
            Some(mut sample_tx) => {
                let device = host
                    .default_input_device()
                    .ok_or(SofiError::NoDevice("input"))?;
                let stream = device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if idle.load(Ordering::Relaxed) {
                                // The ring holds a full second of audio, far
                                // more than any callback burst; a short write
                                // means the demodulator worker has stalled.
                                let written = sample_tx.write(data);
                                debug_assert_eq!(written, data.len());
                                let _ = written;
                            }
                        },
                        |err| error!("input stream error: {err}"),
                        None,
                    )
                    .map_err(|e| SofiError::AudioStream(e.to_string()))?;
                stream
                    .play()
                    .map_err(|e| SofiError::AudioStream(e.to_string()))?;
                Some(stream)
            }
            None => None,
        };

        Ok(Self {
            _output: output,
            _input: input,
        })
    }
}
