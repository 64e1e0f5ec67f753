use std::env;
use std::str::FromStr;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;

use crate::errors::{BridgeError, Result};

/// Program id of the default deployment. Overridable via `PROGRAM_ID`.
pub const DEFAULT_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("AuRex11111111111111111111111111111111111111");

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Bounded retry with exponential backoff. Attempt counts and delays are
/// deployment configuration, not constants baked into call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the given 1-based attempt: base, 2x base, 4x base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/**
 * Everything the bridge needs to run, constructed once per process and
 * injected into the components that need it. There is no ambient global
 * configuration.
 */
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub program_id: Pubkey,
    pub backend_url: String,
    pub backend_api_key: String,
    pub webhook_url: Option<String>,
    /// How long to poll for transaction confirmation before reporting the
    /// outcome as unknown.
    pub confirm_timeout: Duration,
    /// Retry bound for backend writes that reconcile a committed ledger write.
    pub backend_retry: RetryPolicy,
    /// Retry bound for notification delivery. Permanent failure is logged and
    /// dropped; this channel is best-effort by design.
    pub notify_retry: RetryPolicy,
    pub health_interval: Duration,
    /// Number of recently-seen `(signature, slot)` pairs the monitor keeps
    /// for deduplication.
    pub dedup_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: ws_url_from_rpc(DEFAULT_RPC_URL),
            program_id: DEFAULT_PROGRAM_ID,
            backend_url: "https://api.aurex.cash".to_string(),
            backend_api_key: String::new(),
            webhook_url: None,
            confirm_timeout: Duration::from_secs(30),
            backend_retry: RetryPolicy::new(5, Duration::from_millis(500)),
            notify_retry: RetryPolicy::new(3, Duration::from_millis(200)),
            health_interval: Duration::from_secs(30),
            dedup_capacity: 4096,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = BridgeConfig::default();
        if let Ok(rpc_url) = env::var("SOLANA_RPC_URL") {
            config.ws_url = ws_url_from_rpc(&rpc_url);
            config.rpc_url = rpc_url;
        }
        if let Ok(ws_url) = env::var("SOLANA_WS_URL") {
            config.ws_url = ws_url;
        }
        if let Ok(program_id) = env::var("PROGRAM_ID") {
            config.program_id = Pubkey::from_str(&program_id)
                .map_err(|e| BridgeError::Config(format!("invalid PROGRAM_ID: {e}")))?;
        }
        if let Ok(url) = env::var("AUREX_API_URL") {
            config.backend_url = url;
        }
        if let Ok(key) = env::var("AUREX_API_KEY") {
            config.backend_api_key = key;
        }
        config.webhook_url = env::var("WEBHOOK_URL").ok();
        Ok(config)
    }
}

fn ws_url_from_rpc(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        rpc_url.to_string()
    }
}
