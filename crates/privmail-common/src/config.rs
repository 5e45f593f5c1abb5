//! Configuration for PrivMail

use serde::{Deserialize, Serialize};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Enforcement engine tunables
    #[serde(default)]
    pub enforce: EnforceSettings,
}

/// Enforcement engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforceSettings {
    /// Maximum length of a stripped-element snippet in a report
    #[serde(default = "default_snippet_max_len")]
    pub snippet_max_len: usize,

    /// Maximum length of a matched-text excerpt retained per match
    #[serde(default = "default_excerpt_max_len")]
    pub excerpt_max_len: usize,

    /// Compiled size limit for user-supplied patterns, in bytes.
    /// Bounds pathological patterns before they are run.
    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,
}

impl Default for EnforceSettings {
    fn default() -> Self {
        Self {
            snippet_max_len: default_snippet_max_len(),
            excerpt_max_len: default_excerpt_max_len(),
            regex_size_limit: default_regex_size_limit(),
        }
    }
}

fn default_snippet_max_len() -> usize {
    100
}

fn default_excerpt_max_len() -> usize {
    500
}

fn default_regex_size_limit() -> usize {
    1 << 20 // 1MB
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read settings file: {}", e)))?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse settings: {}", e)))?;

        Ok(settings)
    }

    /// Load settings from `PRIVMAIL_CONFIG` or the default locations,
    /// falling back to defaults when no file exists
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("PRIVMAIL_CONFIG") {
            return Self::from_file(std::path::Path::new(&path));
        }

        let paths = [
            std::path::PathBuf::from("./privmail.toml"),
            std::path::PathBuf::from("/etc/privmail/privmail.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Settings::default())
    }
}
