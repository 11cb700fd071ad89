//! # Audio Capture Module
//!
//! This module defines where frames come from. The pipeline only sees the
//! [`FrameSource`] trait; the CPAL-backed implementation turns the input callback
//! into fixed-size mono frames.
//!
//! ## Features
//! - Automatic audio device selection
//! - Mono f32 preferred; other channel counts are averaged down to mono
//! - Exact `buffer_size` frames handed over a bounded channel
//! - Stream released on drop, so every exit path closes the device

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Frames buffered between the audio callback and the consumer.
const CHANNEL_CAPACITY: usize = 4;

/// Something that yields fixed-size mono frames.
pub trait FrameSource {
    /// Blocks until the next full frame is available.
    fn next_frame(&mut self) -> Result<Vec<f32>>;

    /// Returns the next frame if one is ready, without blocking.
    ///
    /// The default delegates to [`FrameSource::next_frame`], which suits sources
    /// that never wait (synthetic generators, files).
    fn try_next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        self.next_frame().map(Some)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Vec<f32>> {
        (**self).next_frame()
    }

    fn try_next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        (**self).try_next_frame()
    }
}

/// Frames captured from the default input device.
pub struct CpalFrameSource {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    reported_drops: usize,
    sample_rate: u32,
    frame_timeout: Duration,
}

impl CpalFrameSource {
    /// Opens the default input device and starts streaming.
    ///
    /// # Arguments
    /// * `sample_rate` - Desired sample rate; the closest supported one is used
    /// * `buffer_size` - Samples per delivered frame
    ///
    /// # Returns
    /// * `Ok(source)` - Running source; check [`CpalFrameSource::sample_rate`]
    /// * `Err(e)` - No device, no f32 format, or the stream failed to start
    pub fn open(sample_rate: u32, buffer_size: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        tracing::info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, sample_rate)
            .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

        let rate = sample_rate.clamp(
            supported_config.min_sample_rate().0,
            supported_config.max_sample_rate().0,
        );
        let config: cpal::StreamConfig = supported_config
            .with_sample_rate(cpal::SampleRate(rate))
            .into();
        let channels = config.channels.max(1) as usize;

        tracing::info!(sample_rate = rate, channels, "Selected input configuration");
        if rate != sample_rate {
            tracing::warn!(requested = sample_rate, actual = rate, "Device does not support requested sample rate");
        }

        let (sender, receiver) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut framer = Framer::new(buffer_size, channels, sender, Arc::clone(&dropped));

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| framer.push(data),
                |err| tracing::error!("An error occurred on the audio stream: {}", err),
                None,
            )
            .context("building input stream")?;

        stream.play().context("starting input stream")?;

        let frame_secs = buffer_size as f64 / rate as f64;
        Ok(Self {
            stream,
            receiver,
            dropped,
            reported_drops: 0,
            sample_rate: rate,
            frame_timeout: Duration::from_secs_f64(frame_secs * 4.0),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn report_drops(&mut self) {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            tracing::warn!(total = dropped, "Dropped frames: consumer is falling behind");
            self.reported_drops = dropped;
        }
    }
}

impl FrameSource for CpalFrameSource {
    fn next_frame(&mut self) -> Result<Vec<f32>> {
        self.report_drops();
        match self.receiver.recv_timeout(self.frame_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "no audio frame within {:.0} ms",
                self.frame_timeout.as_secs_f64() * 1000.0
            )),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("audio stream closed")),
        }
    }

    fn try_next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        self.report_drops();
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("audio stream closed")),
        }
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::warn!("Error pausing stream: {}", e);
        }
        tracing::info!("Audio stream released");
    }
}

/// Accumulates interleaved callback data into mono frames of a fixed size.
struct Framer {
    buffer_size: usize,
    channels: usize,
    pending: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl Framer {
    fn new(buffer_size: usize, channels: usize, sender: Sender<Vec<f32>>, dropped: Arc<AtomicUsize>) -> Self {
        Self {
            buffer_size,
            channels,
            pending: Vec::with_capacity(buffer_size * 2),
            sender,
            dropped,
        }
    }

    fn push(&mut self, data: &[f32]) {
        if self.channels == 1 {
            self.pending.extend_from_slice(data);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.pending
                .extend(data.chunks(self.channels).map(|ch| ch.iter().sum::<f32>() * scale));
        }

        while self.pending.len() >= self.buffer_size {
            let frame: Vec<f32> = self.pending.drain(..self.buffer_size).collect();
            if self.sender.try_send(frame).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Names of every input device on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect())
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// f32 formats only; mono is preferred, then the range closest to the target rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let in_range = (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate);
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let rate_penalty = if in_range { 0 } else { min_diff.min(max_diff) };
            (c.channels() != 1, rate_penalty)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(buffer_size: usize, channels: usize) -> (Framer, Receiver<Vec<f32>>, Arc<AtomicUsize>) {
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        (Framer::new(buffer_size, channels, tx, Arc::clone(&dropped)), rx, dropped)
    }

    #[test]
    fn framer_emits_exact_frames() {
        let (mut f, rx, _) = framer(4, 1);
        f.push(&[1.0, 2.0, 3.0]);
        assert!(rx.try_recv().is_err());
        f.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn framer_downmixes_stereo() {
        let (mut f, rx, _) = framer(2, 2);
        f.push(&[1.0, 3.0, -1.0, 1.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![2.0, 0.0]);
    }

    #[test]
    fn framer_counts_drops_when_consumer_lags() {
        let (mut f, _rx, dropped) = framer(1, 1);
        f.push(&[0.0; CHANNEL_CAPACITY + 3]);
        assert_eq!(dropped.load(Ordering::Relaxed), 3);
    }
}
