use crate::audio::mix;
use crate::error::Error;
use crate::messages::MixCommand;
use crate::store::Blob;
use tokio::sync::{mpsc, oneshot};

/// Combines pairs of blobs off the caller's task
///
/// Decoding and summing are CPU-bound, so each job runs on the blocking pool.
/// Jobs are processed one at a time in arrival order.
pub struct Mixer {
    cmd_rx: mpsc::Receiver<MixCommand>,
}

impl Mixer {
    pub fn new(cmd_rx: mpsc::Receiver<MixCommand>) -> Self {
        Self { cmd_rx }
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                MixCommand::Mix { a, b, reply } => {
                    let result = Self::mix_blocking(a, b).await;
                    if let Err(e) = &result {
                        tracing::error!("Mix failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
            }
        }
        tracing::debug!("Mixer stopped");
    }

    async fn mix_blocking(a: Blob, b: Blob) -> Result<Blob, Error> {
        tracing::debug!(
            "Mixing {} ({} bytes) with {} ({} bytes)",
            a.mime_type(),
            a.len(),
            b.mime_type(),
            b.len()
        );
        tokio::task::spawn_blocking(move || mix::mix(a, b))
            .await
            .map_err(|e| Error::OperationFailed(format!("mix task failed: {}", e)))?
    }
}

/// Handle for communicating with the Mixer
#[derive(Clone)]
pub struct MixerHandle {
    tx: mpsc::Sender<MixCommand>,
}

impl MixerHandle {
    pub fn new(tx: mpsc::Sender<MixCommand>) -> Self {
        Self { tx }
    }

    /// Spawn a mixer on the current runtime and return its handle.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(10);
        tokio::spawn(Mixer::new(rx).run());
        Self::new(tx)
    }

    pub async fn mix(&self, a: Blob, b: Blob) -> Result<Blob, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MixCommand::Mix { a, b, reply })
            .await
            .map_err(|_| Error::OperationFailed("mixer is not running".to_string()))?;

        rx.await
            .map_err(|_| Error::OperationFailed("mixer dropped the reply".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;
    use crate::audio::wav_sink::{WAV_MIME_TYPE, encode_wav};

    fn wav(samples: &[f32]) -> Blob {
        let format = AudioFormat {
            sample_rate: 8000,
            channels: 1,
        };
        Blob::new(WAV_MIME_TYPE, encode_wav(format, samples).unwrap())
    }

    #[tokio::test]
    async fn test_mix_returns_wav() {
        let mixer = MixerHandle::spawn();

        let mixed = mixer
            .mix(wav(&[0.1; 400]), wav(&[0.2; 200]))
            .await
            .unwrap();

        assert_eq!(mixed.mime_type(), WAV_MIME_TYPE);
        let decoded = mix::decode(mixed).unwrap();
        assert_eq!(decoded.samples.len(), 400);
        assert!((decoded.samples[0] - 0.3).abs() < 0.01);
        assert!((decoded.samples[399] - 0.1).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_all_complete() {
        let mixer = MixerHandle::spawn();

        let (first, second) = tokio::join!(
            mixer.mix(wav(&[0.1; 100]), wav(&[0.1; 100])),
            mixer.mix(wav(&[0.4; 50]), wav(&[0.4; 50])),
        );

        assert_eq!(mix::decode(first.unwrap()).unwrap().samples.len(), 100);
        assert_eq!(mix::decode(second.unwrap()).unwrap().samples.len(), 50);
    }

    #[tokio::test]
    async fn test_bad_input_is_reported_and_mixer_survives() {
        let mixer = MixerHandle::spawn();

        let err = mixer
            .mix(Blob::new("audio/ogg", vec![1, 2, 3]), wav(&[0.1; 10]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let err = mixer
            .mix(Blob::new("audio/wav", Vec::new()), wav(&[0.1; 10]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));

        assert!(mixer.mix(wav(&[0.1; 10]), wav(&[0.1; 10])).await.is_ok());
    }
}
