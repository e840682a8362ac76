use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from pvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PvaultConfig {
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub crypto: CryptoConfig,
    pub erase: EraseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for encrypted blobs, the app state document and the fallback
    /// secrets file (default: ~/.local/share/pvault)
    pub data_dir: PathBuf,
    /// Root for ephemeral decrypted files (default: ~/.cache/pvault)
    pub cache_dir: PathBuf,
}

/// Which secure key/value provider backs the vault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    /// Probe the platform keychain, fall back to the file provider
    #[default]
    Auto,
    /// Platform keychain only; fail if unavailable
    Keychain,
    /// File provider only
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,
    /// Keychain service namespace (default: pvault)
    pub service_name: String,
    /// Fallback secrets file, relative to `storage.data_dir` unless absolute
    pub fallback_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Encryption version the controller targets on initialization (default: 1)
    pub target_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EraseConfig {
    /// CSPRNG overwrite passes before the final zero pass (default: 1)
    pub random_passes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/pvault"),
            cache_dir: PathBuf::from("~/.cache/pvault"),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretsBackend::Auto,
            service_name: "pvault".into(),
            fallback_file: PathBuf::from("secrets.json"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { target_version: 1 }
    }
}

impl Default for EraseConfig {
    fn default() -> Self {
        Self { random_passes: 1 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl PvaultConfig {
    /// Parse a config document and validate it.
    pub fn from_toml(content: &str) -> VaultResult<Self> {
        let config: PvaultConfig =
            toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.crypto.target_version == 0 {
            return Err(VaultError::Config(
                "crypto.target_version must be at least 1".into(),
            ));
        }
        if self.secrets.service_name.trim().is_empty() {
            return Err(VaultError::Config("secrets.service_name is empty".into()));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(VaultError::Config(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }

    /// Directory holding `<id>.blob` ciphertext files
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir().join("blobs")
    }

    /// Directory holding ephemeral decrypted files
    pub fn ephemeral_dir(&self) -> PathBuf {
        self.cache_dir().join("ephemeral")
    }

    /// Ordinary (non-secret) app state document
    pub fn state_file(&self) -> PathBuf {
        self.data_dir().join("state.json")
    }
}

impl SecretsConfig {
    pub fn fallback_path(&self, storage: &StorageConfig) -> PathBuf {
        let file = expand_home(&self.fallback_file);
        if file.is_absolute() {
            file
        } else {
            storage.data_dir().join(file)
        }
    }
}

/// Expand a leading `~` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    }
}
