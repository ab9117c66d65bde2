use crate::error::Error;
use crate::store::Blob;
use rodio::OutputStreamBuilder;
use std::io::Cursor;

/// Play a blob on the default output device, returning once it has finished.
pub async fn play(blob: Blob) -> Result<(), Error> {
    blob.validate()?;
    tokio::task::spawn_blocking(move || play_blocking(blob))
        .await
        .map_err(|e| Error::OperationFailed(format!("playback task failed: {}", e)))?
}

fn play_blocking(blob: Blob) -> Result<(), Error> {
    let mime_type = blob.mime_type().to_string();
    let stream_handle = OutputStreamBuilder::open_default_stream()
        .map_err(|e| Error::DeviceDenied(format!("no output device: {}", e)))?;

    let sink = rodio::play(stream_handle.mixer(), Cursor::new(blob.into_bytes()))
        .map_err(|e| Error::Decode(format!("{}: {}", mime_type, e)))?;
    sink.sleep_until_end();

    tracing::debug!("Finished playing {}", mime_type);
    Ok(())
}
