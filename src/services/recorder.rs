use crate::audio::format::{self, AudioFormat};
use crate::audio::mix::remap_channels;
use crate::audio::spectrum::BIN_COUNT;
use crate::audio::{AudioSink, InputDevice, InputStream, SpectrumAnalyser};
use crate::broker::Broker;
use crate::error::Error;
use crate::messages::{Capture, CaptureState, RecorderCommand};
use crate::store::blob::extension_for;
use crate::store::{Blob, SoundKind};
use tokio::sync::{mpsc, oneshot, watch};

/// Resources held only while a capture session is open.
struct Session {
    mime_type: String,
    stream: Box<dyn InputStream>,
    audio_rx: mpsc::Receiver<Vec<f32>>,
    analyser: SpectrumAnalyser,
}

/// Drives one capture session at a time
///
/// This service:
/// - Negotiates the recording format and opens the input device
/// - Streams captured chunks to the AudioSink and the spectrum analyser
/// - Handles start/pause/resume/stop commands
/// - Saves the finished recording through the broker
///
/// Note: This service holds the device stream which is !Send, so it must be
/// spawned on a LocalSet using tokio::task::spawn_local.
pub struct Recorder {
    format: AudioFormat,
    preferences: Vec<String>,
    cmd_rx: mpsc::Receiver<RecorderCommand>,
    device: Box<dyn InputDevice>,
    sink: Box<dyn AudioSink + Send>,
    broker: Broker,
    state: watch::Sender<CaptureState>,
    spectrum: watch::Sender<Option<Vec<u8>>>,
    session: Option<Session>,
}

impl Recorder {
    pub fn new(
        format: AudioFormat,
        preferences: Vec<String>,
        cmd_rx: mpsc::Receiver<RecorderCommand>,
        device: Box<dyn InputDevice>,
        sink: Box<dyn AudioSink + Send>,
        broker: Broker,
    ) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        let (spectrum, _) = watch::channel(None);
        Self {
            format,
            preferences,
            cmd_rx,
            device,
            sink,
            broker,
            state,
            spectrum,
            session: None,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    pub fn subscribe_spectrum(&self) -> watch::Receiver<Option<Vec<u8>>> {
        self.spectrum.subscribe()
    }

    pub async fn run(mut self) {
        loop {
            let recording = self.current_state() == CaptureState::Recording;
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                // Receive and process audio chunks (only when recording)
                Some(chunk) = next_chunk(&mut self.session), if recording => {
                    self.write_chunk(chunk);
                }
            }
        }

        if self.session.take().is_some() {
            tracing::warn!("Recorder shut down mid-session, discarding capture");
        }
        self.spectrum.send_replace(None);
        self.state.send_replace(CaptureState::Idle);
        tracing::debug!("Recorder stopped");
    }

    fn current_state(&self) -> CaptureState {
        *self.state.borrow()
    }

    fn set_state(&self, state: CaptureState) {
        tracing::debug!("Capture state -> {:?}", state);
        self.state.send_replace(state);
    }

    fn expect_state(&self, operation: &'static str, allowed: &[CaptureState]) -> Result<(), Error> {
        let state = self.current_state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState { operation, state })
        }
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Start(reply) => {
                let result = self.start();
                if let Err(e) = &result {
                    tracing::error!("Failed to start recording: {}", e);
                }
                let _ = reply.send(result);
            }
            RecorderCommand::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            RecorderCommand::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            RecorderCommand::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
        }
    }

    fn start(&mut self) -> Result<(), Error> {
        self.expect_state("start", &[CaptureState::Idle])?;

        let mime_type = format::negotiate(&self.preferences, self.sink.supported_mime_types())
            .ok_or(Error::NoSupportedFormat)?
            .to_string();

        // Acquire the device before the encoder so a denied device leaves nothing running
        let (audio_tx, audio_rx) = mpsc::channel(100);
        let stream = self.device.open(self.format, audio_tx)?;

        self.sink.start(self.format)?;

        self.session = Some(Session {
            mime_type,
            stream,
            audio_rx,
            analyser: SpectrumAnalyser::new(),
        });
        self.spectrum.send_replace(Some(vec![0; BIN_COUNT]));
        self.set_state(CaptureState::Recording);

        tracing::info!("Recording started");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), Error> {
        self.expect_state("pause", &[CaptureState::Recording])?;
        if let Some(session) = &self.session {
            session.stream.pause()?;
        }
        self.set_state(CaptureState::Paused);
        tracing::info!("Recording paused");
        Ok(())
    }

    fn resume(&mut self) -> Result<(), Error> {
        self.expect_state("resume", &[CaptureState::Paused])?;
        if let Some(session) = &self.session {
            session.stream.resume()?;
        }
        self.set_state(CaptureState::Recording);
        tracing::info!("Recording resumed");
        Ok(())
    }

    fn write_chunk(&mut self, chunk: Vec<f32>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if self.format.channels > 1 {
            session
                .analyser
                .push_samples(&remap_channels(&chunk, self.format.channels, 1));
        } else {
            session.analyser.push_samples(&chunk);
        }
        self.spectrum
            .send_replace(Some(session.analyser.byte_frequency_data()));

        // Stream chunk to sink (Vec is moved, no copy)
        if let Err(e) = self.sink.write_chunk(chunk) {
            tracing::error!("Failed to write audio chunk: {}", e);
        }
    }

    async fn stop(&mut self) -> Result<Capture, Error> {
        self.expect_state("stop", &[CaptureState::Recording, CaptureState::Paused])?;
        self.set_state(CaptureState::Finalizing);

        let result = self.finalize().await;
        self.set_state(CaptureState::Idle);

        match &result {
            Ok(capture) => match &capture.saved {
                Ok(id) => tracing::info!("Recording saved as {} ({})", capture.name, id),
                Err(e) => tracing::error!("Failed to save recording {}: {}", capture.name, e),
            },
            Err(e) => tracing::error!("Failed to finalize recording: {}", e),
        }
        result
    }

    async fn finalize(&mut self) -> Result<Capture, Error> {
        let Some(session) = self.session.take() else {
            return Err(Error::OperationFailed("no open capture session".to_string()));
        };
        let Session {
            mime_type,
            stream,
            mut audio_rx,
            analyser: _,
        } = session;

        // Dropping the stream releases the device and ends the bridge task
        drop(stream);
        self.spectrum.send_replace(None);

        // Drain any remaining audio chunks from the channel and write them to the sink
        while let Ok(chunk) = audio_rx.try_recv() {
            if let Err(e) = self.sink.write_chunk(chunk) {
                tracing::error!("Failed to write audio chunk during drain: {}", e);
                break;
            }
        }
        drop(audio_rx);

        let bytes = self.sink.finalize().await?;
        let blob = Blob::new(mime_type, bytes);
        let name = format!(
            "recording-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            extension_for(blob.mime_type())
        );

        let saved = self
            .broker
            .save_sound(SoundKind::Recorded, name.clone(), blob.clone())
            .await;

        Ok(Capture { name, blob, saved })
    }
}

async fn next_chunk(session: &mut Option<Session>) -> Option<Vec<f32>> {
    match session {
        Some(session) => session.audio_rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle for communicating with the Recorder
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderCommand>,
    state: watch::Receiver<CaptureState>,
    spectrum: watch::Receiver<Option<Vec<u8>>>,
}

impl RecorderHandle {
    pub fn new(
        tx: mpsc::Sender<RecorderCommand>,
        state: watch::Receiver<CaptureState>,
        spectrum: watch::Receiver<Option<Vec<u8>>>,
    ) -> Self {
        Self {
            tx,
            state,
            spectrum,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Live byte spectrum; `None` while no device is open.
    pub fn spectrum(&self) -> watch::Receiver<Option<Vec<u8>>> {
        self.spectrum.clone()
    }

    pub async fn start(&self) -> Result<(), Error> {
        self.request(RecorderCommand::Start).await
    }

    pub async fn pause(&self) -> Result<(), Error> {
        self.request(RecorderCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), Error> {
        self.request(RecorderCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<Capture, Error> {
        self.request(RecorderCommand::Stop).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> RecorderCommand,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| Error::OperationFailed("recorder is not running".to_string()))?;

        rx.await
            .map_err(|_| Error::OperationFailed("recorder dropped the reply".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WavSink;
    use crate::broker::worker;
    use async_trait::async_trait;
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Feed = Rc<RefCell<Option<mpsc::Sender<Vec<f32>>>>>;

    struct ScriptedInput {
        chunks: Vec<Vec<f32>>,
        paused: Rc<Cell<bool>>,
        open: Rc<Cell<bool>>,
        feed: Feed,
    }

    struct ScriptedStream {
        paused: Rc<Cell<bool>>,
        open: Rc<Cell<bool>>,
        _tx: mpsc::Sender<Vec<f32>>,
    }

    impl InputDevice for ScriptedInput {
        fn open(
            &self,
            _format: AudioFormat,
            chunk_tx: mpsc::Sender<Vec<f32>>,
        ) -> Result<Box<dyn InputStream>, Error> {
            for chunk in &self.chunks {
                chunk_tx.try_send(chunk.clone()).unwrap();
            }
            self.open.set(true);
            *self.feed.borrow_mut() = Some(chunk_tx.clone());
            Ok(Box::new(ScriptedStream {
                paused: self.paused.clone(),
                open: self.open.clone(),
                _tx: chunk_tx,
            }))
        }
    }

    impl InputStream for ScriptedStream {
        fn pause(&self) -> Result<(), Error> {
            self.paused.set(true);
            Ok(())
        }

        fn resume(&self) -> Result<(), Error> {
            self.paused.set(false);
            Ok(())
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.open.set(false);
        }
    }

    struct DeniedInput;

    impl InputDevice for DeniedInput {
        fn open(
            &self,
            _format: AudioFormat,
            _chunk_tx: mpsc::Sender<Vec<f32>>,
        ) -> Result<Box<dyn InputStream>, Error> {
            Err(Error::DeviceDenied("permission denied".to_string()))
        }
    }

    fn scripted(open: Rc<Cell<bool>>) -> Box<dyn InputDevice> {
        Box::new(ScriptedInput {
            chunks: vec![vec![0.25; 100], vec![-0.25; 100], vec![0.5; 100]],
            paused: Rc::new(Cell::new(false)),
            open,
            feed: Feed::default(),
        })
    }

    /// Counts encoder sessions started on the wrapped sink.
    struct CountingSink {
        inner: WavSink,
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AudioSink for CountingSink {
        fn supported_mime_types(&self) -> &[&'static str] {
            self.inner.supported_mime_types()
        }

        fn start(&mut self, format: AudioFormat) -> Result<(), Error> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.inner.start(format)
        }

        fn write_chunk(&mut self, samples: Vec<f32>) -> Result<(), Error> {
            self.inner.write_chunk(samples)
        }

        async fn finalize(&mut self) -> Result<Vec<u8>, Error> {
            self.inner.finalize().await
        }
    }

    fn spawn_recorder(
        device: Box<dyn InputDevice>,
        preferences: &[&str],
        broker: Broker,
    ) -> RecorderHandle {
        spawn_recorder_with_sink(device, preferences, broker, Box::new(WavSink::new()))
    }

    fn spawn_recorder_with_sink(
        device: Box<dyn InputDevice>,
        preferences: &[&str],
        broker: Broker,
        sink: Box<dyn AudioSink + Send>,
    ) -> RecorderHandle {
        let (tx, rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            AudioFormat {
                sample_rate: 8000,
                channels: 1,
            },
            preferences.iter().map(|p| p.to_string()).collect(),
            rx,
            device,
            sink,
            broker,
        );
        let handle = RecorderHandle::new(tx, recorder.subscribe_state(), recorder.subscribe_spectrum());
        tokio::task::spawn_local(recorder.run());
        handle
    }

    async fn store_broker() -> Broker {
        let broker = Broker::spawn("sqlite::memory:", Duration::from_secs(5));
        broker.wait_ready().await.unwrap();
        broker
    }

    fn wav_len(blob: &Blob) -> usize {
        let reader = hound::WavReader::new(Cursor::new(blob.as_bytes().to_vec())).unwrap();
        reader.len() as usize
    }

    #[tokio::test]
    async fn test_full_session_saves_one_recording() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let open = Rc::new(Cell::new(false));
                let recorder =
                    spawn_recorder(scripted(open.clone()), format::DEFAULT_PREFERENCES, broker.clone());

                recorder.start().await.unwrap();
                assert_eq!(recorder.state(), CaptureState::Recording);
                assert!(open.get());

                recorder.pause().await.unwrap();
                assert_eq!(recorder.state(), CaptureState::Paused);
                recorder.resume().await.unwrap();
                assert_eq!(recorder.state(), CaptureState::Recording);

                let capture = recorder.stop().await.unwrap();
                assert_eq!(recorder.state(), CaptureState::Idle);
                assert!(!open.get());

                assert_eq!(capture.blob.mime_type(), "audio/wav");
                assert!(capture.name.starts_with("recording-"));
                assert!(capture.name.ends_with(".wav"));
                assert_eq!(wav_len(&capture.blob), 300);

                let id = capture.saved.unwrap();
                let recorded = broker.get_sounds(SoundKind::Recorded).await.unwrap();
                assert_eq!(recorded.len(), 1);
                assert_eq!(recorded[0].id, id);
                assert_eq!(recorded[0].blob, capture.blob);
            })
            .await;
    }

    #[tokio::test]
    async fn test_invalid_transitions_leave_state_alone() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let recorder = spawn_recorder(
                    scripted(Rc::new(Cell::new(false))),
                    format::DEFAULT_PREFERENCES,
                    broker,
                );

                assert!(matches!(
                    recorder.pause().await,
                    Err(Error::InvalidState { operation: "pause", state: CaptureState::Idle })
                ));
                assert!(matches!(recorder.stop().await, Err(Error::InvalidState { .. })));
                assert_eq!(recorder.state(), CaptureState::Idle);

                recorder.start().await.unwrap();
                assert!(matches!(
                    recorder.resume().await,
                    Err(Error::InvalidState { operation: "resume", state: CaptureState::Recording })
                ));
                assert!(matches!(recorder.start().await, Err(Error::InvalidState { .. })));
                assert_eq!(recorder.state(), CaptureState::Recording);

                recorder.stop().await.unwrap();
                assert_eq!(recorder.state(), CaptureState::Idle);
            })
            .await;
    }

    #[tokio::test]
    async fn test_no_supported_format() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let open = Rc::new(Cell::new(false));
                let recorder = spawn_recorder(scripted(open.clone()), &["audio/webm", "audio/mp4"], broker);

                assert_eq!(recorder.start().await, Err(Error::NoSupportedFormat));
                assert_eq!(recorder.state(), CaptureState::Idle);
                assert!(!open.get());
            })
            .await;
    }

    #[tokio::test]
    async fn test_denied_device() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let recorder = spawn_recorder(Box::new(DeniedInput), format::DEFAULT_PREFERENCES, broker);

                assert!(matches!(recorder.start().await, Err(Error::DeviceDenied(_))));
                assert_eq!(recorder.state(), CaptureState::Idle);
                assert!(recorder.spectrum().borrow().is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn test_denied_device_starts_no_encoder() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let starts = Arc::new(AtomicUsize::new(0));
                let sink = Box::new(CountingSink {
                    inner: WavSink::new(),
                    starts: starts.clone(),
                });
                let recorder = spawn_recorder_with_sink(
                    Box::new(DeniedInput),
                    format::DEFAULT_PREFERENCES,
                    broker.clone(),
                    sink,
                );

                assert!(matches!(recorder.start().await, Err(Error::DeviceDenied(_))));
                assert_eq!(starts.load(Ordering::SeqCst), 0);

                let sink = Box::new(CountingSink {
                    inner: WavSink::new(),
                    starts: starts.clone(),
                });
                let recorder = spawn_recorder_with_sink(
                    scripted(Rc::new(Cell::new(false))),
                    format::DEFAULT_PREFERENCES,
                    broker,
                    sink,
                );
                recorder.start().await.unwrap();
                assert_eq!(starts.load(Ordering::SeqCst), 1);
                recorder.stop().await.unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn test_pause_holds_back_chunks_until_resume() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let paused = Rc::new(Cell::new(false));
                let open = Rc::new(Cell::new(false));
                let feed = Feed::default();
                let device = Box::new(ScriptedInput {
                    chunks: Vec::new(),
                    paused: paused.clone(),
                    open: open.clone(),
                    feed: feed.clone(),
                });
                let recorder = spawn_recorder(device, format::DEFAULT_PREFERENCES, broker);
                let mut spectrum = recorder.spectrum();

                recorder.start().await.unwrap();
                let tx = feed.borrow().clone().unwrap();
                let _ = spectrum.borrow_and_update();

                tx.send(vec![0.25; 256]).await.unwrap();
                tokio::time::timeout(Duration::from_secs(1), spectrum.changed())
                    .await
                    .unwrap()
                    .unwrap();

                recorder.pause().await.unwrap();
                assert!(paused.get());
                assert!(open.get());
                let _ = spectrum.borrow_and_update();

                // Arrives while paused; must wait for resume
                tx.send(vec![0.5; 256]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert!(!spectrum.has_changed().unwrap());

                recorder.resume().await.unwrap();
                assert!(!paused.get());
                tokio::time::timeout(Duration::from_secs(1), spectrum.changed())
                    .await
                    .unwrap()
                    .unwrap();

                drop(tx);
                let capture = recorder.stop().await.unwrap();
                let mut reader =
                    hound::WavReader::new(Cursor::new(capture.blob.as_bytes().to_vec())).unwrap();
                let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
                assert_eq!(samples.len(), 512);
                assert!(samples[..256].iter().all(|&s| (8000..9000).contains(&s)));
                assert!(samples[256..].iter().all(|&s| (16000..17000).contains(&s)));
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_save_still_returns_audio() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let (link, _endpoint) = worker::channel();
                let never_ready = Broker::connect(link, Duration::from_secs(5));
                let recorder = spawn_recorder(
                    scripted(Rc::new(Cell::new(false))),
                    format::DEFAULT_PREFERENCES,
                    never_ready,
                );

                recorder.start().await.unwrap();
                let capture = recorder.stop().await.unwrap();

                assert_eq!(recorder.state(), CaptureState::Idle);
                assert!(capture.blob.is_well_formed());
                assert!(matches!(
                    capture.saved.unwrap_err().error,
                    Error::WorkerUnavailable(_)
                ));
            })
            .await;
    }

    #[tokio::test]
    async fn test_spectrum_feed_only_while_capturing() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let broker = store_broker().await;
                let recorder = spawn_recorder(
                    scripted(Rc::new(Cell::new(false))),
                    format::DEFAULT_PREFERENCES,
                    broker,
                );
                let spectrum = recorder.spectrum();
                assert!(spectrum.borrow().is_none());

                recorder.start().await.unwrap();
                let bins = spectrum.borrow().clone().unwrap();
                assert_eq!(bins.len(), BIN_COUNT);

                recorder.stop().await.unwrap();
                assert!(spectrum.borrow().is_none());
            })
            .await;
    }
}
