//! Session persistence for IRMix
//!
//! Stores which impulse response sits in each slot, its alignment offset and
//! every named parameter, in a plain `key=value` text file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Number of slots a session describes
pub const SESSION_SLOTS: usize = 4;

/// Persisted state of one slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSession {
    /// Impulse response file loaded into the slot
    pub path: Option<PathBuf>,
    /// Alignment offset in milliseconds
    pub align_ms: f32,
}

/// Complete persisted mixer state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub slots: [SlotSession; SESSION_SLOTS],
    /// Named parameter values, in store order
    pub params: Vec<(String, f32)>,
}

impl SessionState {
    /// Load the session from the default location
    ///
    /// Returns an empty session if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        Self::load_from(&Self::session_path()).unwrap_or_default()
    }

    /// Load a session from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save the session to the default location
    pub fn save(&self) -> io::Result<()> {
        self.save_to(&Self::session_path())
    }

    /// Save the session to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Get the default session file path
    pub fn session_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("irmix")
            .join("session.txt")
    }

    /// Look up a stored parameter value by name
    pub fn param(&self, name: &str) -> Option<f32> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Parse a session from `key=value` lines
    ///
    /// Keys are `slotN.path`, `slotN.align_ms` (N = 1..4) and `param.<Name>`.
    /// Unknown keys and unparsable values are skipped.
    pub fn parse(content: &str) -> Self {
        let mut session = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if let Some(name) = key.strip_prefix("param.") {
                if let Ok(v) = value.parse::<f32>() {
                    session.params.push((name.to_string(), v));
                }
                continue;
            }

            let Some((slot, field)) = key.strip_prefix("slot").and_then(|k| k.split_once('.')) else {
                continue;
            };
            let index = match slot.parse::<usize>() {
                Ok(n) if (1..=SESSION_SLOTS).contains(&n) => n - 1,
                _ => continue,
            };

            match field {
                "path" => {
                    if !value.is_empty() {
                        session.slots[index].path = Some(PathBuf::from(value));
                    }
                }
                "align_ms" => {
                    if let Ok(v) = value.parse::<f32>() {
                        session.slots[index].align_ms = v;
                    }
                }
                _ => {}
            }
        }

        session
    }

    /// Serialize the session to `key=value` lines
    pub fn serialize(&self) -> String {
        let mut lines = vec!["# IRMix session".to_string()];

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(ref path) = slot.path {
                lines.push(format!("slot{}.path={}", i + 1, path.display()));
            }
            lines.push(format!("slot{}.align_ms={}", i + 1, slot.align_ms));
        }

        for (name, value) in &self.params {
            lines.push(format!("param.{}={}", name, value));
        }

        lines.join("\n")
    }
}
