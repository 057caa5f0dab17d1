use config::ConfigError;

use crate::error::ConfigError as SettingsError;

/// Shortest HMAC secret accepted for signing access tokens
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// JWT signing and token lifetime settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    /// Current signing secret
    pub secret: String,
    /// Retired secrets still accepted for verification
    #[serde(default)]
    pub previous_secrets: Vec<String>,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

impl JwtSettings {
    /// Reject settings that would produce weak or self-contradicting tokens
    pub fn validate(&self) -> Result<(), SettingsError> {
        for secret in std::iter::once(&self.secret).chain(self.previous_secrets.iter()) {
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(SettingsError::InvalidValue(format!(
                    "jwt secrets must be at least {} bytes",
                    MIN_SECRET_LENGTH
                )));
            }
        }

        if self.access_token_expiry <= 0 {
            return Err(SettingsError::InvalidValue(
                "jwt.access_token_expiry must be positive".to_string(),
            ));
        }

        if self.refresh_token_expiry <= self.access_token_expiry {
            return Err(SettingsError::InvalidValue(
                "jwt.refresh_token_expiry must exceed jwt.access_token_expiry".to_string(),
            ));
        }

        if self.issuer.trim().is_empty() {
            return Err(SettingsError::MissingRequired("jwt.issuer".to_string()));
        }

        Ok(())
    }
}

/// Session policy switches
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SessionSettings {
    /// Blacklist the redeemed pair on rotation so its access token dies with it
    #[serde(default = "enabled")]
    pub blacklist_on_rotation: bool,
    /// Refuse a refresh whose client context differs from the issuing one
    #[serde(default)]
    pub bind_client_context: bool,
    /// Refresh tokens only become redeemable once their access token has expired
    #[serde(default)]
    pub refresh_after_access_expiry: bool,
    #[serde(default = "default_hash_cost")]
    pub hash_cost: u32,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "enabled")]
    pub persist_blacklist: bool,
}

fn enabled() -> bool {
    true
}

fn default_hash_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            blacklist_on_rotation: true,
            bind_client_context: false,
            refresh_after_access_expiry: false,
            hash_cost: default_hash_cost(),
            cleanup_interval_seconds: default_cleanup_interval(),
            persist_blacklist: true,
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            previous_secrets: vec![],
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    #[test]
    fn test_valid_jwt_settings() {
        assert!(jwt().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut settings = jwt();
        settings.secret = "short".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_short_previous_secret_rejected() {
        let mut settings = jwt();
        settings.previous_secrets = vec!["tiny".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let mut settings = jwt();
        settings.refresh_token_expiry = settings.access_token_expiry;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_session_defaults() {
        let session = SessionSettings::default();
        assert!(session.blacklist_on_rotation);
        assert!(!session.bind_client_context);
        assert!(!session.refresh_after_access_expiry);
        assert_eq!(session.hash_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn test_bundled_configuration_loads() {
        let settings = get_configuration().expect("Failed to read configuration");
        assert!(settings.jwt.validate().is_ok());
        assert!(settings.session.cleanup_interval_seconds > 0);
    }
}
