use super::format::AudioFormat;
use crate::error::Error;
use async_trait::async_trait;

/// Trait for streaming audio encoding
///
/// A sink turns captured chunks into encoded fragments as they arrive and
/// joins them into one payload when the session ends.
#[async_trait]
pub trait AudioSink: Send {
    /// MIME types this sink can produce.
    fn supported_mime_types(&self) -> &[&'static str];

    /// Begin a new session; discards anything left from a previous one.
    fn start(&mut self, format: AudioFormat) -> Result<(), Error>;

    /// Write audio samples (streaming, called repeatedly during recording)
    /// The Vec is moved to avoid copying
    fn write_chunk(&mut self, samples: Vec<f32>) -> Result<(), Error>;

    /// Concatenate all fragments into the final encoded bytes
    async fn finalize(&mut self) -> Result<Vec<u8>, Error>;
}
