pub mod capture;
pub mod format;
pub mod mix;
pub mod playback;
pub mod sink;
pub mod spectrum;
pub mod wav_sink;

pub use capture::{AudioCapture, InputDevice, InputStream};
pub use format::AudioFormat;
pub use sink::AudioSink;
pub use spectrum::SpectrumAnalyser;
pub use wav_sink::WavSink;
