use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use minichat_gateway::GatewayConfig;
use minichat_gateway::handshake::HandshakeMode;

/// Secrets that ship in sample files and must never be used for real.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "",
    "secret",
    "changeme",
    "change-me",
    "dev-secret-change-me",
    "your-secret-key",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub trust_handshake_username: bool,
    pub allowed_origins: Vec<String>,
    pub session_queue: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("MINICHAT_JWT_SECRET").context("MINICHAT_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("MINICHAT_JWT_SECRET is a placeholder; set a real secret");
        }

        let port = var("MINICHAT_PORT", "8080")
            .parse()
            .context("MINICHAT_PORT must be a port number")?;
        let token_ttl_hours: i64 = var("MINICHAT_TOKEN_TTL_HOURS", "24")
            .parse()
            .context("MINICHAT_TOKEN_TTL_HOURS must be an integer")?;
        if token_ttl_hours <= 0 {
            bail!("MINICHAT_TOKEN_TTL_HOURS must be positive");
        }
        let session_queue: usize = var("MINICHAT_SESSION_QUEUE", "64")
            .parse()
            .context("MINICHAT_SESSION_QUEUE must be an integer")?;
        if session_queue == 0 {
            bail!("MINICHAT_SESSION_QUEUE must be at least 1");
        }

        let trust_handshake_username = matches!(
            var("MINICHAT_TRUST_HANDSHAKE_USERNAME", "false")
                .to_ascii_lowercase()
                .as_str(),
            "1" | "true" | "yes"
        );

        let allowed_origins = var(
            "MINICHAT_ALLOWED_ORIGINS",
            "http://localhost:5173,http://localhost:3000",
        )
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();

        Ok(Self {
            host: var("MINICHAT_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("MINICHAT_DB_PATH", "minichat.db")),
            jwt_secret,
            token_ttl_hours,
            trust_handshake_username,
            allowed_origins,
            session_queue,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            handshake_mode: if self.trust_handshake_username {
                HandshakeMode::TrustClaimedUsername
            } else {
                HandshakeMode::VerifiedToken
            },
            session_queue: self.session_queue,
        }
    }
}
