use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SettingsError;
use crate::profile::PhysiologicalProfile;

pub const APP_NAME: &str = "PulseBurn";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub osc_address: String,
    pub osc_port: u16,
    pub publish_osc: bool,
    pub device_name_filter: Option<String>,
    pub scan_timeout_secs: u64,
    pub profile: PhysiologicalProfile,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            osc_address: "127.0.0.1".to_string(),
            osc_port: 9000,
            publish_osc: false,
            device_name_filter: None,
            scan_timeout_secs: 30,
            profile: PhysiologicalProfile::default(),
        }
    }
}

impl AppSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// Per-user data directory, created on first use.
pub fn app_data_dir() -> Result<PathBuf, SettingsError> {
    let dir = dirs::data_local_dir().ok_or(SettingsError::NoDataDir)?.join(APP_NAME);

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }

    Ok(dir)
}

pub fn app_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(app_data_dir()?.join("settings.json"))
}

/// Reads and writes `settings.json`.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Result<Self, SettingsError> {
        Ok(Self::new(app_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        let settings_json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, settings_json)?;
        Ok(())
    }

    /// Writes defaults over whatever is on disk.
    pub fn reset(&self) -> Result<AppSettings, SettingsError> {
        let settings = AppSettings::default();
        self.write(&settings)?;
        Ok(settings)
    }

    /// Loads the settings without touching the file on failure.
    pub fn load(&self) -> Result<AppSettings, SettingsError> {
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Loads the settings, falling back to (and persisting) defaults when the
    /// file is missing or unreadable.
    pub fn read(&self) -> Result<AppSettings, SettingsError> {
        if !self.path.exists() {
            return self.reset();
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Unreadable settings file, resetting");
                return self.reset();
            }
        };

        match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Corrupt settings file, resetting");
                self.reset()
            }
        }
    }
}

/// Re-reads the settings every `every` and pushes profile changes into `tx`.
///
/// `resolve` turns freshly loaded settings into the profile to publish. Unreadable
/// or half-written files are skipped and the previous profile stays in effect.
/// Returns once every receiver is gone.
pub async fn follow_profile<F>(store: SettingsStore, every: Duration, tx: watch::Sender<PhysiologicalProfile>, resolve: F)
where
    F: Fn(&AppSettings) -> PhysiologicalProfile,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => return,
            _ = ticker.tick() => {}
        }

        let settings = match store.load() {
            Ok(settings) => settings,
            Err(err) => {
                debug!(path = %store.path().display(), error = %err, "Skipping settings reload");
                continue;
            }
        };

        let profile = resolve(&settings);
        let changed = tx.send_if_modified(|current| {
            if *current == profile {
                return false;
            }
            *current = profile;
            true
        });

        if changed {
            info!(weight_kg = profile.weight_kg, age = profile.age_years, sex = ?profile.sex, "Profile updated from settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::BiologicalSex;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("settings.json"))
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let settings = store.read().unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(store.path().exists());
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut settings = AppSettings::default();
        settings.osc_port = 9001;
        settings.device_name_filter = Some("Polar".into());
        settings.profile.sex = BiologicalSex::Female;
        store.write(&settings).unwrap();

        assert_eq!(store.read().unwrap(), settings);
    }

    #[test]
    fn test_corrupt_file_is_reset() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();

        assert_eq!(store.read().unwrap(), AppSettings::default());
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(on_disk.contains("\"osc_port\": 9000"));
    }

    #[test]
    fn test_load_does_not_reset_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{ half").unwrap();

        assert!(store.load().is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{ half");
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_profile_picks_up_edits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write(&AppSettings::default()).unwrap();

        let (tx, mut rx) = watch::channel(PhysiologicalProfile::default());
        let follower = tokio::spawn(follow_profile(store.clone(), Duration::from_secs(2), tx, |s| s.profile));

        // Garbage mid-edit is skipped.
        std::fs::write(store.path(), "{ not json").unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!rx.has_changed().unwrap());

        let mut settings = AppSettings::default();
        settings.profile = PhysiologicalProfile { weight_kg: 60.0, age_years: 30.0, sex: BiologicalSex::Female };
        store.write(&settings).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), settings.profile);

        drop(rx);
        follower.await.unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), r#"{ "osc_port": 9100 }"#).unwrap();

        let settings = store.read().unwrap();
        assert_eq!(settings.osc_port, 9100);
        assert_eq!(settings.scan_timeout_secs, 30);
    }
}
