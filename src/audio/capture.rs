use super::format::AudioFormat;
use crate::error::Error;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use ringbuf::{HeapRb, traits::*};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};

/// An open capture stream. Dropping it releases the device.
pub trait InputStream {
    fn pause(&self) -> Result<(), Error>;
    fn resume(&self) -> Result<(), Error>;
}

/// Source of microphone audio.
pub trait InputDevice {
    /// Open the device and start sending chunks of interleaved samples on
    /// `chunk_tx`. Fails with [`Error::DeviceDenied`] when the device cannot
    /// be acquired.
    fn open(
        &self,
        format: AudioFormat,
        chunk_tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, Error>;
}

/// The host's default input device, via cpal.
pub struct AudioCapture;

impl InputDevice for AudioCapture {
    fn open(
        &self,
        format: AudioFormat,
        chunk_tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, Error> {
        Ok(Box::new(Self::start(format, chunk_tx)?))
    }
}

impl InputStream for cpal::Stream {
    fn pause(&self) -> Result<(), Error> {
        StreamTrait::pause(self).map_err(|e| Error::OperationFailed(format!("pause failed: {}", e)))
    }

    fn resume(&self) -> Result<(), Error> {
        self.play()
            .map_err(|e| Error::OperationFailed(format!("resume failed: {}", e)))
    }
}

impl AudioCapture {
    /// Start audio capture
    ///
    /// Returns the stream which must be kept alive for audio capture to continue.
    /// Audio chunks are sent via chunk_tx. Must be called inside a `LocalSet`.
    pub fn start(format: AudioFormat, chunk_tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream, Error> {
        let ring = HeapRb::<f32>::new(format.samples_for_duration(60.0));
        let (mut producer, consumer) = ring.split();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceDenied("no input audio device available".to_string()))?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let notify = Arc::new(Notify::new());
        let notify_callback = notify.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    producer.push_slice(data);
                    notify_callback.notify_one();
                },
                move |err| {
                    tracing::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::DeviceDenied(format!("failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| Error::DeviceDenied(format!("failed to start audio stream: {}", e)))?;

        let chunk_size = format.samples_for_duration(0.1).max(1);
        tokio::task::spawn_local(Self::bridge_task(consumer, chunk_tx, chunk_size, notify));

        tracing::info!("Audio capture started");
        Ok(stream)
    }

    async fn bridge_task(
        mut consumer: impl Consumer<Item = f32>,
        tx: mpsc::Sender<Vec<f32>>,
        chunk_size: usize,
        notify: Arc<Notify>,
    ) {
        loop {
            tokio::select! {
                _ = notify.notified() => {}
                _ = tx.closed() => break,
            }

            while consumer.occupied_len() >= chunk_size {
                let mut chunk = vec![0.0f32; chunk_size];
                let n = consumer.pop_slice(&mut chunk);
                chunk.truncate(n);

                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        }
    }
}
