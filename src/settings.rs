use std::path::{Path, PathBuf};

use crate::error::HistoryError;
use crate::history::{DepthLimit, InsertMode};

const SETTINGS_FILE: &str = "paintundo_settings.cfg";

/// History preferences that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct HistorySettings {
    /// `-1` unlimited, `0` undo disabled, otherwise the number of kept events
    pub undo_queue_depth: isize,
    /// What a new edit does to events that were undone
    pub insert_mode: InsertMode,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            undo_queue_depth: 50,
            insert_mode: InsertMode::TruncateRedo,
        }
    }
}

impl HistorySettings {
    pub fn depth_limit(&self) -> DepthLimit {
        DepthLimit::from(self.undo_queue_depth)
    }

    /// Path to the settings file.
    /// On Linux:   ~/.config/paintundo/paintundo_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\paintundo\paintundo_settings.cfg
    /// On macOS:   ~/Library/Application Support/paintundo/paintundo_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("paintundo").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("paintundo")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("paintundo").join(SETTINGS_FILE))
        }
    }

    /// Load from the default location (defaults if missing or unreadable)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        Self::parse(&content)
    }

    fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            match (key.trim(), val.trim()) {
                ("undo_queue_depth", val) => {
                    s.undo_queue_depth = val.parse().unwrap_or(s.undo_queue_depth);
                }
                ("insert_mode", val) => {
                    s.insert_mode = match val {
                        "insert" => InsertMode::Insert,
                        _ => InsertMode::TruncateRedo,
                    };
                }
                _ => {}
            }
        }
        s
    }

    fn render(&self) -> String {
        let mode_str = match self.insert_mode {
            InsertMode::Insert => "insert",
            InsertMode::TruncateRedo => "truncate",
        };
        format!(
            "undo_queue_depth={}\n\
             insert_mode={mode_str}\n",
            self.undo_queue_depth,
        )
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), HistoryError> {
        let path = Self::settings_path()
            .ok_or_else(|| HistoryError::Settings("no configuration directory".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = HistorySettings::load_from(&dir.path().join("nope.cfg"));
        assert_eq!(s, HistorySettings::default());
        assert_eq!(s.depth_limit(), DepthLimit::Bounded(50));
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join(SETTINGS_FILE);
        let s = HistorySettings {
            undo_queue_depth: -1,
            insert_mode: InsertMode::Insert,
        };
        s.save_to(&path).unwrap();
        let loaded = HistorySettings::load_from(&path);
        assert_eq!(loaded, s);
        assert_eq!(loaded.depth_limit(), DepthLimit::Unbounded);
    }

    #[test]
    fn garbage_values_fall_back() {
        let s = HistorySettings::parse("undo_queue_depth=lots\nbogus\ntheme=dark\ninsert_mode=insert\n");
        assert_eq!(s.undo_queue_depth, 50);
        assert_eq!(s.insert_mode, InsertMode::Insert);
    }
}
