use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
            jwt_expiry_seconds: default_jwt_expiry(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PresenceConfig {
    /// Shared Redis for multi-instance deployments. Unset runs the
    /// single-process in-memory backend.
    pub redis_url: Option<String>,
    #[serde(default = "default_presence_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_presence_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_offline_grace_ms")]
    pub offline_grace_ms: u64,
    /// Pub/sub channel carrying events between instances.
    #[serde(default = "default_bridge_channel")]
    pub bridge_channel: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_presence_key_prefix(),
            ttl_secs: default_presence_ttl(),
            offline_grace_ms: default_offline_grace_ms(),
            bridge_channel: default_bridge_channel(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn generate_random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(HEX[rng.gen_range(0..16)]))
        .collect()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_database_url() -> String {
    "sqlite://./data/alumnet.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    8
}
fn default_jwt_expiry() -> u64 {
    86_400
}
fn default_presence_key_prefix() -> String {
    "alumnet:presence".into()
}
fn default_presence_ttl() -> u64 {
    120
}
fn default_offline_grace_ms() -> u64 {
    5_000
}
fn default_bridge_channel() -> String {
    "alumnet:events".into()
}
fn default_ping_interval() -> u64 {
    20
}
fn default_event_bus_capacity() -> usize {
    4096
}

fn looks_like_placeholder_secret(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return true;
    }
    normalized.contains("change_me")
        || normalized.contains("changeme")
        || normalized.contains("replace_me")
        || normalized.contains("replace_with")
        || normalized.starts_with("example")
        || normalized == "secret"
}

fn validate_secret_configuration(config: &Config) -> Result<()> {
    let jwt_secret = config.auth.jwt_secret.trim();
    if jwt_secret.len() < 32 || looks_like_placeholder_secret(jwt_secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a strong random secret (at least 32 characters) and never leave placeholder values"
        );
    }
    Ok(())
}

/// Presence entries only get their expiry pushed out on the ping tick, so a
/// TTL that does not outlast one interval lets live connections expire.
fn validate_presence_timing(config: &Config) -> Result<()> {
    let ping_secs = config.ping_interval().as_secs();
    if config.presence.ttl_secs <= ping_secs {
        anyhow::bail!(
            "Invalid presence.ttl_secs ({}): must be greater than gateway.ping_interval_secs ({})",
            config.presence.ttl_secs,
            ping_secs
        );
    }
    Ok(())
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Alumnet realtime gateway configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[database]
url = "{db_url}"
max_connections = {max_connections}

[auth]
# Must match the secret the account service signs tokens with.
jwt_secret = "{jwt_secret}"
jwt_expiry_seconds = {jwt_expiry}

[presence]
# Shared Redis for running several gateway instances. Leave unset for a
# single instance with in-memory presence.
# redis_url = "redis://127.0.0.1:6379"
key_prefix = "{key_prefix}"
ttl_secs = {ttl_secs}
# How long a user with no open connections is still reported online.
offline_grace_ms = {offline_grace_ms}
bridge_channel = "{bridge_channel}"

[gateway]
ping_interval_secs = {ping_interval}
event_bus_capacity = {event_bus_capacity}
"#,
        bind_address = config.server.bind_address,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        jwt_expiry = config.auth.jwt_expiry_seconds,
        key_prefix = config.presence.key_prefix,
        ttl_secs = config.presence.ttl_secs,
        offline_grace_ms = config.presence.offline_grace_ms,
        bridge_channel = config.presence.bridge_channel,
        ping_interval = config.gateway.ping_interval_secs,
        event_bus_capacity = config.gateway.event_bus_capacity,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            let template = generate_config_template(&config);
            fs::write(path, &template)?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        let _ = harden_secret_file_permissions(path);

        config.apply_env_overrides();
        validate_secret_configuration(&config)?;
        validate_presence_timing(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("ALUMNET_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("ALUMNET_DATABASE_URL") {
            self.database.url = value;
        }
        if let Ok(value) = std::env::var("ALUMNET_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                self.database.max_connections = parsed;
            }
        }
        if let Ok(value) = std::env::var("ALUMNET_JWT_SECRET") {
            self.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("ALUMNET_JWT_EXPIRY_SECONDS") {
            if let Ok(parsed) = value.parse::<u64>() {
                self.auth.jwt_expiry_seconds = parsed;
            }
        }
        if let Ok(value) = std::env::var("ALUMNET_REDIS_URL") {
            let trimmed = value.trim();
            self.presence.redis_url = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Ok(value) = std::env::var("ALUMNET_OFFLINE_GRACE_MS") {
            match value.parse::<u64>() {
                Ok(parsed) => self.presence.offline_grace_ms = parsed,
                Err(_) => tracing::warn!(
                    "Ignoring invalid ALUMNET_OFFLINE_GRACE_MS value '{}'; expected milliseconds",
                    value
                ),
            }
        }
        if let Ok(value) = std::env::var("ALUMNET_REDIS_PRESENCE_TTL_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                self.presence.ttl_secs = parsed;
            }
        }
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_millis(self.presence.offline_grace_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.ping_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::{looks_like_placeholder_secret, Config};
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("alumnet.toml");
        std::fs::write(&path, body).expect("write config");
        path.to_str().expect("config path utf8").to_string()
    }

    #[test]
    fn missing_file_generates_a_loadable_template() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("alumnet.toml");
        let path = path.to_str().expect("config path utf8");

        let first = Config::load(path).expect("generate config");
        assert!(std::path::Path::new(path).exists());
        assert_eq!(first.auth.jwt_secret.len(), 64);

        let second = Config::load(path).expect("reload config");
        assert_eq!(first.auth.jwt_secret, second.auth.jwt_secret);
        assert_eq!(second.presence.ttl_secs, 120);
        assert_eq!(second.gateway.ping_interval_secs, 20);
    }

    #[test]
    fn omitted_sections_take_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(&temp, &format!("[auth]\njwt_secret = \"{SECRET}\"\n"));
        let config = Config::load(&path).expect("load config");
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.presence.key_prefix, "alumnet:presence");
        assert_eq!(config.gateway.event_bus_capacity, 4096);
        assert_eq!(config.ping_interval(), Duration::from_secs(20));
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &temp,
            "[auth]\njwt_secret = \"change_me_change_me_change_me_change_me\"\n",
        );
        assert!(Config::load(&path).is_err());

        let path = write_config(&temp, "[auth]\njwt_secret = \"too-short\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn placeholder_detection() {
        assert!(looks_like_placeholder_secret("  "));
        assert!(looks_like_placeholder_secret("Example-secret-value"));
        assert!(!looks_like_placeholder_secret(SECRET));
    }

    #[test]
    fn presence_ttl_must_outlast_the_ping_interval() {
        let temp = tempfile::tempdir().expect("tempdir");
        for (ttl, ping, ok) in [(10, 20, false), (20, 20, false), (30, 20, true), (3, 2, true)] {
            let path = write_config(
                &temp,
                &format!(
                    "[auth]\njwt_secret = \"{SECRET}\"\n\n[presence]\nttl_secs = {ttl}\n\n[gateway]\nping_interval_secs = {ping}\n"
                ),
            );
            assert_eq!(Config::load(&path).is_ok(), ok, "ttl {ttl} with ping {ping}");
        }
    }

    #[test]
    fn env_overrides_presence_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &temp,
            &format!("[auth]\njwt_secret = \"{SECRET}\"\n\n[presence]\noffline_grace_ms = 100\n"),
        );
        std::env::set_var("ALUMNET_REDIS_URL", "redis://cache:6379");
        std::env::set_var("ALUMNET_OFFLINE_GRACE_MS", "750");
        let config = Config::load(&path).expect("load config");
        std::env::remove_var("ALUMNET_OFFLINE_GRACE_MS");
        std::env::remove_var("ALUMNET_REDIS_URL");

        assert_eq!(config.presence.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.offline_grace(), Duration::from_millis(750));
    }
}
