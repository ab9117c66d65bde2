pub mod mixer;
pub mod recorder;

pub use mixer::{Mixer, MixerHandle};
pub use recorder::{Recorder, RecorderHandle};
