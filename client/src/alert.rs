/// Audible alert for detected print jobs.
///
/// Playback is fire-and-forget: each alert decodes and plays the sound file on
/// its own short-lived thread, and every failure is logged rather than
/// returned. Real playback needs the `audio` cargo feature (rodio); without it
/// the alert is only logged.
use std::path::PathBuf;
use tracing::{info, warn};

pub trait Alert {
    fn play(&self);
}

/// Plays one local audio file per alert.
pub struct SoundAlert {
    path: Option<PathBuf>,
}

impl SoundAlert {
    /// `None` disables the alert. A missing file is reported now and again on
    /// every play, since it may appear later.
    pub fn new(path: Option<PathBuf>) -> Self {
        match &path {
            Some(p) if !p.exists() => warn!("Sound file not found: {}", p.display()),
            Some(p) => info!("Alert sound: {}", p.display()),
            None => info!("Alert sound disabled"),
        }
        Self { path }
    }

    #[cfg(test)]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

impl Alert for SoundAlert {
    fn play(&self) {
        let Some(path) = self.path.clone() else {
            return;
        };
        if !path.exists() {
            warn!("Sound file not found: {}", path.display());
            return;
        }
        spawn_playback(path);
    }
}

#[cfg(feature = "audio")]
fn spawn_playback(path: PathBuf) {
    let spawned = std::thread::Builder::new()
        .name("alert".into())
        .spawn(move || play_file(&path));
    if let Err(e) = spawned {
        warn!("Failed to start alert playback: {e}");
    }
}

#[cfg(feature = "audio")]
fn play_file(path: &std::path::Path) {
    use std::io::BufReader;
    use tracing::error;

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open sound file '{}': {e}", path.display());
            return;
        }
    };
    let stream = match rodio::OutputStreamBuilder::open_default_stream() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open audio output: {e}");
            return;
        }
    };
    let source = match rodio::Decoder::new(BufReader::new(file)) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to decode sound file '{}': {e}", path.display());
            return;
        }
    };
    let sink = rodio::Sink::connect_new(stream.mixer());
    sink.append(source);
    sink.sleep_until_end();
}

#[cfg(not(feature = "audio"))]
fn spawn_playback(path: PathBuf) {
    info!("Alert: {} (built without audio support)", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_alert_has_no_path_and_plays_nothing() {
        let alert = SoundAlert::new(None);
        assert!(alert.path().is_none());
        alert.play();
    }

    #[test]
    fn missing_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp3");
        let alert = SoundAlert::new(Some(path.clone()));
        assert_eq!(alert.path(), Some(path.as_path()));
        alert.play();
    }

    #[cfg(not(feature = "audio"))]
    #[test]
    fn existing_file_without_audio_support_only_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ding.mp3");
        std::fs::write(&path, b"not really audio").unwrap();
        SoundAlert::new(Some(path)).play();
    }
}
