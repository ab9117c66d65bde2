// Captured audio is f32 in [-1.0, 1.0] until it reaches a sink; sinks decide the
// stored encoding.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    /// Calculate number of samples for a given duration in seconds
    pub fn samples_for_duration(&self, seconds: f32) -> usize {
        (self.sample_rate as f32 * seconds * self.channels as f32) as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

/// Recording MIME types in order of preference, most capable codec first.
pub const DEFAULT_PREFERENCES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "audio/wav",
];

/// Pick the first preferred MIME type the encoder supports.
pub fn negotiate<'a, S: AsRef<str>>(preferences: &'a [S], supported: &[&str]) -> Option<&'a str> {
    preferences
        .iter()
        .map(AsRef::as_ref)
        .find(|candidate| {
            supported
                .iter()
                .any(|s| s.eq_ignore_ascii_case(candidate.trim()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picks_first_supported_preference() {
        assert_eq!(negotiate(DEFAULT_PREFERENCES, &["audio/wav"]), Some("audio/wav"));
        assert_eq!(
            negotiate(DEFAULT_PREFERENCES, &["audio/wav", "audio/webm"]),
            Some("audio/webm")
        );
    }

    #[test]
    fn test_no_supported_format() {
        assert_eq!(negotiate(DEFAULT_PREFERENCES, &["audio/flac"]), None);
        let empty: [&str; 0] = [];
        assert_eq!(negotiate(&empty, &["audio/wav"]), None);
    }

    #[test]
    fn test_samples_for_duration() {
        let format = AudioFormat {
            sample_rate: 16000,
            channels: 2,
        };
        assert_eq!(format.samples_for_duration(0.5), 16000);
    }
}
