use crate::poller::AlertSink;
use crate::repository::{Repository, SETTING_SOUND_ENABLED, SETTING_SOUND_PATH};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Plays the configured alert sound. Gating (enabled flag, configured
/// directory, eligible file) is re-checked on every invocation so settings
/// changes apply immediately. Every failure path is a silent no-op.
pub struct SoundPlayer {
    repository: Repository,
}

impl SoundPlayer {
    pub fn new(repository: Repository) -> Self {
        SoundPlayer { repository }
    }

    pub fn play_alert(&self) {
        if !self
            .repository
            .get_bool_setting(SETTING_SOUND_ENABLED)
            .unwrap_or_default()
        {
            return;
        }

        let dir = self
            .repository
            .get_setting(SETTING_SOUND_PATH)
            .unwrap_or_default();
        if dir.is_empty() {
            return;
        }

        match find_alert_sound(Path::new(&dir)) {
            Some(file) => spawn_player(&file),
            None => debug!("no alert sound file found in {dir}"),
        }
    }
}

/// First `.mp3` or `.wav` file in the directory, by name, so the pick is
/// stable across runs.
pub fn find_alert_sound(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(str::to_ascii_lowercase)
                        .as_deref(),
                    Some("mp3") | Some("wav")
                )
        })
        .collect();

    candidates.sort();
    candidates.into_iter().next()
}

fn spawn_player(file: &Path) {
    let file = file.to_string_lossy().into_owned();

    let candidates: Vec<Vec<String>> = if cfg!(target_os = "macos") {
        vec![vec!["/usr/bin/afplay".into(), file]]
    } else if cfg!(target_os = "windows") {
        vec![vec![
            "powershell".into(),
            "-c".into(),
            format!("(New-Object Media.SoundPlayer '{file}').PlaySync()"),
        ]]
    } else {
        ["aplay", "paplay", "ffplay"]
            .iter()
            .map(|player| vec![(*player).to_string(), file.clone()])
            .collect()
    };

    for argv in candidates {
        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if spawned.is_ok() {
            return;
        }
    }

    debug!("no audio player available for alert sound");
}

/// Desktop implementation of the poller's fire-and-forget alert capabilities:
/// configured sound via [`SoundPlayer`], deep links via the system browser.
pub struct DesktopAlerts {
    player: SoundPlayer,
}

impl DesktopAlerts {
    pub fn new(repository: Repository) -> Self {
        DesktopAlerts {
            player: SoundPlayer::new(repository),
        }
    }
}

impl AlertSink for DesktopAlerts {
    fn play_sound(&self) {
        self.player.play_alert();
    }

    fn open_browser(&self, url: &str) {
        if let Err(err) = open::that_detached(url) {
            warn!("failed to open incident in browser: {err}");
        }
    }
}
