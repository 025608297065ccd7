// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for a tether session.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL for business calls and the renewal exchange.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "TETHER_API_URL")]
    pub api_url: String,

    /// WebSocket URL of the notification endpoint. Notifications are disabled if unset.
    #[arg(long, env = "TETHER_NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Path of the renewal exchange, relative to `api_url`.
    #[arg(long, default_value = "/api/auth/refresh", env = "TETHER_RENEWAL_PATH")]
    pub renewal_path: String,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TETHER_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Renew ahead of expiry when the credential has fewer than this many seconds left.
    #[arg(long, default_value_t = 30, env = "TETHER_RENEW_MARGIN_SECS")]
    pub renew_margin_secs: u64,

    /// Max consecutive reconnect attempts before the channel gives up.
    #[arg(long, default_value_t = 5, env = "TETHER_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// First reconnect backoff in milliseconds.
    #[arg(long, default_value_t = 500, env = "TETHER_RECONNECT_INITIAL_MS")]
    pub reconnect_initial_ms: u64,

    /// Reconnect backoff ceiling in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "TETHER_RECONNECT_MAX_MS")]
    pub reconnect_max_ms: u64,

    /// Timeout for a single notification connect attempt in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TETHER_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Message ids remembered per topic for de-duplication.
    #[arg(long, default_value_t = 256, env = "TETHER_DEDUP_CAPACITY")]
    pub dedup_capacity: usize,

    /// How long a delivered message id is remembered, in seconds.
    #[arg(long, default_value_t = 300, env = "TETHER_DEDUP_TTL_SECS")]
    pub dedup_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_owned(),
            notify_url: None,
            renewal_path: "/api/auth/refresh".to_owned(),
            request_timeout_ms: 10_000,
            renew_margin_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 10_000,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn renew_margin(&self) -> Duration {
        Duration::from_secs(self.renew_margin_secs)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            renewal_path: self.renewal_path.clone(),
            renew_margin: self.renew_margin(),
        }
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            dedup_capacity: self.dedup_capacity,
            dedup_ttl: Duration::from_secs(self.dedup_ttl_secs),
        }
    }
}

/// Settings consumed by the request pipeline and renewal coordinator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub renewal_path: String,
    pub renew_margin: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        SessionConfig::default().pipeline()
    }
}

/// Settings consumed by the notification channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
    pub dedup_capacity: usize,
    pub dedup_ttl: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        SessionConfig::default().channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        session: SessionConfig,
    }

    #[test]
    fn clap_defaults_match_default_impl() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["tether"])?;
        let defaults = SessionConfig::default();
        assert_eq!(cli.session.api_url, defaults.api_url);
        assert_eq!(cli.session.renewal_path, defaults.renewal_path);
        assert_eq!(cli.session.max_reconnect_attempts, defaults.max_reconnect_attempts);
        assert_eq!(cli.session.reconnect_initial_ms, defaults.reconnect_initial_ms);
        assert_eq!(cli.session.reconnect_max_ms, defaults.reconnect_max_ms);
        assert_eq!(cli.session.dedup_capacity, defaults.dedup_capacity);
        Ok(())
    }

    #[test]
    fn channel_view_converts_units() {
        let config = SessionConfig {
            reconnect_initial_ms: 250,
            reconnect_max_ms: 4_000,
            dedup_ttl_secs: 60,
            ..SessionConfig::default()
        };
        let channel = config.channel();
        assert_eq!(channel.reconnect_initial, Duration::from_millis(250));
        assert_eq!(channel.reconnect_max, Duration::from_secs(4));
        assert_eq!(channel.dedup_ttl, Duration::from_secs(60));
    }
}
