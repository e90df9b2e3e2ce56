//! Core configuration (§6): a YAML document at `~/.mcp-code-api/config.yaml`
//! holding per-provider credentials. Grounded on this codebase's config
//! layering (a root config with optional, `#[serde(default)]`-heavy nested
//! provider structs) and on `FilesystemFileStorage::store`'s atomic-write
//! pattern (temp file, `sync_all`, permissions, rename), adapted from TOML to
//! the YAML shape §6 specifies.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to resolve home directory")]
    NoHomeDirectory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One OAuth2 credential entry under `providers.anthropic.oauth_credentials`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthCredential {
    pub id: String,
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuthCredential {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnthropicProviderConfig {
    #[serde(default)]
    pub oauth_credentials: Vec<OAuthCredential>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: Option<AnthropicProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl CoreConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Resolves `~/.mcp-code-api/config.yaml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    Ok(home.join(".mcp-code-api").join("config.yaml"))
}

#[instrument(skip_all, fields(path = %path.display()))]
pub async fn load(path: &Path) -> Result<CoreConfig, ConfigError> {
    debug!("loading config");
    let contents = tokio::fs::read_to_string(path).await?;
    CoreConfig::from_yaml(&contents)
}

/// Atomically writes `config` to `path`: serialize, write `<path>.tmp`,
/// `sync_all`, set 0600 permissions, then rename over the target. Creates the
/// parent directory (0755) first if it doesn't exist.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn save(path: &Path, config: &CoreConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755)).await?;
        }
    }

    let yaml = config.to_yaml()?;
    let temp_path = path.with_extension("tmp");

    let file = tokio::fs::File::create(&temp_path).await?;
    {
        use tokio::io::AsyncWriteExt;
        let mut file = file;
        file.write_all(yaml.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&temp_path, path).await?;
    info!("config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
providers:
  anthropic:
    oauth_credentials:
      - id: default
        client_id: 11111111-1111-1111-1111-111111111111
        access_token: at-123
        refresh_token: rt-456
        expires_at: "2026-01-01T00:00:00Z"
        scopes: ["profile"]
    api_key: sk-ant-fallback
"#;

    #[test]
    fn parses_sample_yaml() {
        let config = CoreConfig::from_yaml(SAMPLE_YAML).unwrap();
        let anthropic = config.providers.anthropic.unwrap();
        assert_eq!(anthropic.oauth_credentials.len(), 1);
        assert_eq!(anthropic.oauth_credentials[0].id, "default");
        assert_eq!(anthropic.api_key.as_deref(), Some("sk-ant-fallback"));
    }

    #[test]
    fn missing_providers_defaults_to_empty() {
        let config = CoreConfig::from_yaml("{}").unwrap();
        assert!(config.providers.anthropic.is_none());
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = CoreConfig::from_yaml(SAMPLE_YAML).unwrap();
        let yaml = config.to_yaml().unwrap();
        let reparsed = CoreConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, reparsed);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_sets_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = CoreConfig::from_yaml(SAMPLE_YAML).unwrap();

        save(&path, &config).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(config, loaded);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn credential_expiry_check() {
        let cred = OAuthCredential {
            id: "x".into(),
            client_id: "c".into(),
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            scopes: vec![],
        };
        assert!(cred.is_expired());
    }
}
