use crate::audio::playback;
use crate::audio::{AudioCapture, AudioSink, WavSink};
use crate::broker::Broker;
use crate::catalog::{Catalog, Session, SoundSummary};
use crate::config::Config;
use crate::error::Error;
use crate::services::{MixerHandle, Recorder, RecorderHandle};
use crate::store::{Blob, SoundId, SoundKind, SoundRecord};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record,
    Pause,
    Resume,
    Stop,
    Level,
    Status,
    List(SoundKind),
    Search(String),
    Download(u64),
    Delete(SoundId),
    Mix {
        a: SoundId,
        b: SoundId,
        out: Option<PathBuf>,
    },
    Play(SoundId),
    Token(Option<String>),
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  record | pause | resume | stop   control the microphone capture
  level                            show the live input spectrum
  status                           show store and recorder state
  list <downloaded|recorded>       list stored sounds
  search <query>                   search the remote catalog
  download <catalog id>            download and store a catalog sound
  delete <id>                      delete a stored sound
  mix <id> <id> [out.wav]          mix two stored sounds, play or export
  play <id>                        play a stored sound
  token [value]                    set or clear the catalog token
  quit";

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().context("Empty command")?;
        let rest: Vec<&str> = words.collect();

        let command = match (verb, rest.as_slice()) {
            ("record", []) => Command::Record,
            ("pause", []) => Command::Pause,
            ("resume", []) => Command::Resume,
            ("stop", []) => Command::Stop,
            ("level", []) => Command::Level,
            ("status", []) => Command::Status,
            ("list", [kind]) => Command::List(kind.parse()?),
            ("search", words) if !words.is_empty() => Command::Search(words.join(" ")),
            ("download", [id]) => Command::Download(parse_id(id)?),
            ("delete", [id]) => Command::Delete(parse_id(id)?),
            ("mix", [a, b]) => Command::Mix {
                a: parse_id(a)?,
                b: parse_id(b)?,
                out: None,
            },
            ("mix", [a, b, out]) => Command::Mix {
                a: parse_id(a)?,
                b: parse_id(b)?,
                out: Some(PathBuf::from(out)),
            },
            ("play", [id]) => Command::Play(parse_id(id)?),
            ("token", []) => Command::Token(None),
            ("token", [value]) => Command::Token(Some(value.to_string())),
            ("help", _) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(anyhow::anyhow!("Unrecognised command: {:?} (try help)", line.trim())),
        };
        Ok(command)
    }
}

fn parse_id<T: std::str::FromStr>(word: &str) -> Result<T> {
    word.parse()
        .map_err(|_| anyhow::anyhow!("Not a valid id: {:?}", word))
}

pub struct App {
    broker: Broker,
    recorder: RecorderHandle,
    mixer: MixerHandle,
    catalog: Catalog,
    session: Session,
    search_results: HashMap<u64, SoundSummary>,
}

impl App {
    /// Build the pipeline. Must be called inside a `LocalSet`.
    pub fn new(config: Config) -> Result<Self> {
        let broker = Broker::spawn(&config.database_url, config.call_timeout());
        let recorder = Self::setup_audio_pipeline(&config, broker.clone());
        let mixer = MixerHandle::spawn();
        let catalog = Catalog::new(&config.api_url, &config.api_key, config.call_timeout())
            .context("Failed to create catalog client")?;
        let session = Session::new(config.token.clone());

        Ok(Self {
            broker,
            recorder,
            mixer,
            catalog,
            session,
            search_results: HashMap::new(),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        match self.broker.wait_ready().await {
            Ok(()) => tracing::info!("Sound store ready"),
            Err(e) => tracing::error!("Sound store is not available: {}", e),
        }
        println!("{}", HELP);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read stdin")? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = self.handle(command).await {
                                tracing::error!("{:#}", e);
                            }
                        }
                        Err(e) => tracing::warn!("{}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(self) {
        if self.recorder.state().is_active() {
            tracing::info!("Finishing the open recording before exit");
            if let Err(e) = self.recorder.stop().await {
                tracing::error!("Failed to finish recording: {}", e);
            }
        }
        self.broker.terminate();
        tracing::info!("Soundbank shutdown complete");
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        tracing::debug!("Handling {:?}", command);
        match command {
            Command::Record => {
                self.recorder.start().await?;
                println!("recording");
            }
            Command::Pause => {
                self.recorder.pause().await?;
                println!("paused");
            }
            Command::Resume => {
                self.recorder.resume().await?;
                println!("recording");
            }
            Command::Stop => self.handle_stop().await?,
            Command::Level => self.show_level(),
            Command::Status => println!(
                "store: {:?}, {} calls pending; recorder: {:?}",
                self.broker.state(),
                self.broker.pending_calls(),
                self.recorder.state()
            ),
            Command::List(kind) => {
                let sounds = self.broker.get_sounds(kind).await?;
                if sounds.is_empty() {
                    println!("no {} sounds", kind);
                }
                for sound in &sounds {
                    println!("{}", describe(sound));
                }
            }
            Command::Search(query) => self.handle_search(&query).await?,
            Command::Download(catalog_id) => self.handle_download(catalog_id).await?,
            Command::Delete(id) => {
                self.broker.delete_sound(id).await?;
                println!("deleted {}", id);
            }
            Command::Mix { a, b, out } => self.handle_mix(a, b, out).await?,
            Command::Play(id) => {
                let sound = self.fetch(id).await?;
                println!("playing {}", sound.name);
                spawn_playback(sound.name, sound.blob);
            }
            Command::Token(token) => {
                self.session.set_token(token);
                println!(
                    "token {}",
                    if self.session.token().is_some() { "set" } else { "cleared" }
                );
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
        Ok(())
    }

    async fn handle_stop(&mut self) -> Result<()> {
        let capture = self.recorder.stop().await?;
        match capture.saved {
            Ok(id) => println!("saved {} as {} ({} bytes)", capture.name, id, capture.blob.len()),
            Err(e) => {
                // Keep the audio rather than lose it
                let fallback = std::env::temp_dir().join(&capture.name);
                tokio::fs::write(&fallback, capture.blob.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write {:?}", fallback))?;
                tracing::error!("{}; recording written to {:?}", e, fallback);
            }
        }
        Ok(())
    }

    fn show_level(&self) {
        let spectrum = self.recorder.spectrum();
        let bins = spectrum.borrow();
        let Some(bins) = bins.as_ref() else {
            println!("not recording");
            return;
        };

        // Collapse the bins into 32 columns of 0..8 blocks
        const BARS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        let columns: String = bins
            .chunks(bins.len().div_ceil(32).max(1))
            .map(|chunk| {
                let loudest = chunk.iter().copied().max().unwrap_or(0) as usize;
                BARS[loudest * 8 / 255]
            })
            .collect();
        println!("|{}|", columns);
    }

    async fn handle_search(&mut self, query: &str) -> Result<()> {
        let results = self.catalog.search(query, &self.session).await?;
        if results.is_empty() {
            println!("no results for {:?}", query);
        }
        for sound in &results {
            println!("{:>8}  {}  by {} ({})", sound.id, sound.name, sound.username, sound.license);
        }
        self.search_results = results.into_iter().map(|s| (s.id, s)).collect();
        Ok(())
    }

    async fn handle_download(&mut self, catalog_id: u64) -> Result<()> {
        let blob = self.catalog.download(catalog_id, &self.session).await?;
        let name = self
            .search_results
            .get(&catalog_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("catalog-{}.{}", catalog_id, blob.extension()));

        let id = self
            .broker
            .save_sound(SoundKind::Downloaded, name.clone(), blob)
            .await?;
        println!("saved {} as {}", name, id);
        Ok(())
    }

    async fn handle_mix(&self, a: SoundId, b: SoundId, out: Option<PathBuf>) -> Result<()> {
        let (first, second) = futures::try_join!(self.fetch(a), self.fetch(b))?;
        println!("mixing {} with {}", first.name, second.name);

        let mixed = self.mixer.mix(first.blob, second.blob).await?;
        match out {
            Some(path) => {
                tokio::fs::write(&path, mixed.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("wrote {} bytes to {:?}", mixed.len(), path);
            }
            None => {
                spawn_playback(format!("mix of {} and {}", first.name, second.name), mixed);
            }
        }
        Ok(())
    }

    async fn fetch(&self, id: SoundId) -> Result<SoundRecord> {
        self.broker
            .get_sound_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sound {}", id)).into())
    }

    fn setup_audio_pipeline(config: &Config, broker: Broker) -> RecorderHandle {
        let sink: Box<dyn AudioSink + Send> = Box::new(WavSink::new());

        // Create and spawn Recorder (using spawn_local because it's !Send)
        let (recorder_tx, recorder_rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            config.audio_format(),
            config.format_preferences.clone(),
            recorder_rx,
            Box::new(AudioCapture),
            sink,
            broker,
        );
        let recorder_handle = RecorderHandle::new(
            recorder_tx,
            recorder.subscribe_state(),
            recorder.subscribe_spectrum(),
        );
        tokio::task::spawn_local(recorder.run());

        recorder_handle
    }
}

/// Play in the background so the command loop keeps reading input.
fn spawn_playback(name: String, blob: Blob) -> JoinHandle<Result<(), Error>> {
    tokio::spawn(async move {
        let result = playback::play(blob).await;
        match &result {
            Ok(()) => tracing::debug!("Finished playing {}", name),
            Err(e) => tracing::error!("Failed to play {}: {}", name, e),
        }
        result
    })
}

fn describe(sound: &SoundRecord) -> String {
    format!(
        "{:>6}  {:<32} {:<24} {:>9} bytes  {}",
        sound.id,
        sound.name,
        sound.blob.mime_type(),
        sound.blob.len(),
        sound.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capture_commands() {
        assert_eq!(Command::parse("record").unwrap(), Command::Record);
        assert_eq!(Command::parse("  stop  ").unwrap(), Command::Stop);
        assert!(Command::parse("record now").is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            Command::parse("list recorded").unwrap(),
            Command::List(SoundKind::Recorded)
        );
        assert!(Command::parse("list uploaded").is_err());
        assert!(Command::parse("list").is_err());
    }

    #[test]
    fn test_parse_search_keeps_query_words() {
        assert_eq!(
            Command::parse("search heavy rain").unwrap(),
            Command::Search("heavy rain".to_string())
        );
        assert!(Command::parse("search").is_err());
    }

    #[test]
    fn test_parse_mix() {
        assert_eq!(
            Command::parse("mix 1 2").unwrap(),
            Command::Mix {
                a: 1,
                b: 2,
                out: None
            }
        );
        assert_eq!(
            Command::parse("mix 1 2 out.wav").unwrap(),
            Command::Mix {
                a: 1,
                b: 2,
                out: Some(PathBuf::from("out.wav"))
            }
        );
        assert!(Command::parse("mix 1 x").is_err());
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(Command::parse("token").unwrap(), Command::Token(None));
        assert_eq!(
            Command::parse("token abc").unwrap(),
            Command::Token(Some("abc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_playback_runs_off_the_command_loop() {
        let playing = spawn_playback("empty".to_string(), Blob::new("audio/wav", Vec::new()));

        let result = playing.await.unwrap();
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_parse_unknown() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("dance").is_err());
        assert_eq!(Command::parse("quit").unwrap(), Command::Quit);
    }
}
