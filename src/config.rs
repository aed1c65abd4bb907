use std::net::SocketAddr;

use anyhow::Context;
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Sign-in methods enabled for this process. Credentials are always on.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub credentials_enabled: bool,
    pub google: Option<GoogleConfig>,
}

impl ProvidersConfig {
    pub fn federated_enabled(&self) -> bool {
        self.google.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub jwt: JwtConfig,
    pub providers: ProvidersConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match var("APP_ENV").as_deref() {
            None | Some("development") | Some("dev") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => anyhow::bail!("unknown APP_ENV value: {other}"),
        };

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let host = var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("APP_PORT").unwrap_or_else(|| "8080".into());
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid APP_HOST/APP_PORT: {host}:{port}"))?;

        let secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => {
                anyhow::bail!("JWT_SECRET must be set in production")
            }
            None => {
                warn!("JWT_SECRET not set; using a random per-process secret, sessions will not survive restarts");
                random_secret()
            }
        };
        let jwt = JwtConfig {
            secret,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "logistics".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "logistics-users".into()),
        };

        let explicit_public_url = var("PUBLIC_URL");
        let public_url = explicit_public_url
            .clone()
            .unwrap_or_else(|| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        let google = match (var("GOOGLE_CLIENT_ID"), var("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => {
                if environment.is_production() && explicit_public_url.is_none() {
                    anyhow::bail!("PUBLIC_URL is required in production when Google sign-in is enabled");
                }
                info!("google oauth provider configured");
                Some(GoogleConfig {
                    client_id,
                    client_secret,
                    redirect_url: format!("{public_url}/api/auth/google/callback"),
                })
            }
            _ => {
                warn!("google oauth not configured; set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET to enable");
                None
            }
        };

        Ok(Self {
            environment,
            database_url,
            bind_addr,
            jwt,
            providers: ProvidersConfig {
                credentials_enabled: true,
                google,
            },
        })
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(|k| vars.get(k).cloned())
    }

    #[test]
    fn production_requires_jwt_secret() {
        let err = load(&[("APP_ENV", "production"), ("DATABASE_URL", "postgres://x")]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn development_generates_secret() {
        let cfg = load(&[("DATABASE_URL", "postgres://x")]).expect("config");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.jwt.secret.len(), 64);
        assert_eq!(cfg.jwt.issuer, "logistics");
        assert!(cfg.providers.credentials_enabled);
        assert!(!cfg.providers.federated_enabled());
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn bind_address_from_host_and_port() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("APP_HOST", "127.0.0.1"),
            ("APP_PORT", "3000"),
        ])
        .expect("config");
        assert_eq!(cfg.bind_addr, "127.0.0.1:3000".parse().unwrap());

        let err = load(&[("DATABASE_URL", "postgres://x"), ("APP_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn blank_google_credentials_disable_federation() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "   "),
        ])
        .expect("config");
        assert!(cfg.providers.google.is_none());
    }

    #[test]
    fn google_redirect_uses_public_url() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("PUBLIC_URL", "https://desk.example.com/"),
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "secret"),
        ])
        .expect("config");
        let google = cfg.providers.google.expect("google enabled");
        assert_eq!(
            google.redirect_url,
            "https://desk.example.com/api/auth/google/callback"
        );
    }

    #[test]
    fn production_google_requires_public_url() {
        let err = load(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s3cret"),
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "secret"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PUBLIC_URL"));
    }

    #[test]
    fn missing_database_url_fails() {
        assert!(load(&[]).is_err());
    }
}
