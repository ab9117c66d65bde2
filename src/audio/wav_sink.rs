use super::format::AudioFormat;
use super::sink::AudioSink;
use crate::error::Error;
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use tokio::sync::{mpsc, oneshot};

pub const WAV_MIME_TYPE: &str = "audio/wav";

enum WavCommand {
    WriteChunk(Vec<f32>),
    Finalize {
        reply: oneshot::Sender<Result<Vec<u8>, Error>>,
    },
}

/// WAV encoder using a dedicated thread per session
///
/// Chunks are converted to 16-bit PCM fragments on the encoder thread as they
/// arrive, so the recorder never blocks on encoding. Finalizing joins the
/// fragments behind a WAV header.
pub struct WavSink {
    tx: Option<mpsc::UnboundedSender<WavCommand>>,
}

impl WavSink {
    pub fn new() -> Self {
        Self { tx: None }
    }
}

impl Default for WavSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for WavSink {
    fn supported_mime_types(&self) -> &[&'static str] {
        &[WAV_MIME_TYPE]
    }

    fn start(&mut self, format: AudioFormat) -> Result<(), Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("wav-encoder".to_string())
            .spawn(move || {
                let mut fragments: Vec<Vec<u8>> = Vec::new();
                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        WavCommand::WriteChunk(samples) => {
                            fragments.push(encode_pcm16(&samples));
                        }
                        WavCommand::Finalize { reply } => {
                            let _ = reply.send(wav_from_fragments(format, &fragments));
                            break;
                        }
                    }
                }
            })
            .map_err(|e| Error::OperationFailed(format!("failed to start encoder: {}", e)))?;

        // Dropping the previous sender ends any encoder left from an aborted session.
        self.tx = Some(tx);
        Ok(())
    }

    fn write_chunk(&mut self, samples: Vec<f32>) -> Result<(), Error> {
        self.tx
            .as_ref()
            .ok_or_else(|| Error::OperationFailed("encoder not started".to_string()))?
            .send(WavCommand::WriteChunk(samples))
            .map_err(|_| Error::OperationFailed("encoder stopped".to_string()))
    }

    async fn finalize(&mut self) -> Result<Vec<u8>, Error> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::OperationFailed("encoder not started".to_string()))?;

        let (reply, rx) = oneshot::channel();
        tx.send(WavCommand::Finalize { reply })
            .map_err(|_| Error::OperationFailed("encoder stopped".to_string()))?;

        rx.await
            .map_err(|_| Error::OperationFailed("encoder dropped the finalize reply".to_string()))?
    }
}

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit little-endian PCM, clamping
/// out-of-range values.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let amplitude = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&amplitude.to_le_bytes());
    }
    data
}

/// Wrap concatenated 16-bit PCM fragments in a WAV container.
pub fn wav_from_fragments(format: AudioFormat, fragments: &[Vec<u8>]) -> Result<Vec<u8>, Error> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, wav_spec(format))?;
        for fragment in fragments {
            for pair in fragment.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode interleaved f32 samples as a 16-bit WAV file.
pub fn encode_wav(format: AudioFormat, samples: &[f32]) -> Result<Vec<u8>, Error> {
    wav_from_fragments(format, &[encode_pcm16(samples)])
}

fn wav_spec(format: AudioFormat) -> WavSpec {
    WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: AudioFormat::BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}
