use std::{env, net::SocketAddr, time::Duration};

use url::Url;

use crate::error::AppError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cookie_secret: String,
    pub poll_interval: Duration,
    pub supabase: Option<SupabaseConfig>,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: Url,
    pub anon_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://voyage.db?mode=rwc".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let poll_interval = match env::var("POLL_INTERVAL_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|err| AppError::Config(format!("invalid POLL_INTERVAL_MS: {err}")))?,
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };
        if poll_interval == 0 {
            return Err(AppError::Config("POLL_INTERVAL_MS must be positive".into()));
        }

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-voyage-session-cookie-secret".to_string());

        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_ANON_KEY")) {
            (Ok(url), Ok(anon_key)) if !url.trim().is_empty() && !anon_key.trim().is_empty() => {
                let url = Url::parse(url.trim())
                    .map_err(|err| AppError::Config(format!("invalid SUPABASE_URL: {err}")))?;
                Some(SupabaseConfig {
                    url,
                    anon_key: anon_key.trim().to_string(),
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            listen_addr,
            cookie_secret,
            poll_interval: Duration::from_millis(poll_interval),
            supabase,
        })
    }
}
