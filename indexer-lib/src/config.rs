use crate::error::ConfigError;
use alloy::primitives::Address;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_FINALITY: u64 = 0;
pub const DEFAULT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_MAIN_BLOCKS_PER_QUERY: u64 = 1000;
pub const DEFAULT_INITIAL_BLOCKS_PER_QUERY: u64 = 1000;
pub const DEFAULT_INITIAL_QUERY_INTERVAL_MS: u64 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 10_000;

/// Window width and pacing of one sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseConfig {
    pub blocks_per_query: u64,
    pub interval: Duration,
}

/// Per request timeout and backoff policy of the retrying source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub request_timeout: Duration,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Delay before retry number `retry` (zero based): doubles each time, capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_RETRY_BACKOFF_MS),
        }
    }
}

/// Validated, immutable settings shared by both sync phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Blocks behind the tip that are treated as final.
    pub finality: u64,
    pub backfill: PhaseConfig,
    pub incremental: PhaseConfig,
    pub retry: RetryConfig,
}

/// Raw numeric settings as supplied on the command line, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub finality: u64,
    pub interval_ms: u64,
    pub main_blocks_per_query: u64,
    pub initial_blocks_per_query: u64,
    pub initial_query_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            finality: DEFAULT_FINALITY,
            interval_ms: DEFAULT_INTERVAL_MS,
            main_blocks_per_query: DEFAULT_MAIN_BLOCKS_PER_QUERY,
            initial_blocks_per_query: DEFAULT_INITIAL_BLOCKS_PER_QUERY,
            initial_query_interval_ms: DEFAULT_INITIAL_QUERY_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_retry_backoff_ms: DEFAULT_MAX_RETRY_BACKOFF_MS,
        }
    }
}

fn positive(flag: &'static str, value: u64, unit: &str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            flag,
            reason: format!("should be a positive integer{unit}, got 0"),
        });
    }
    Ok(value)
}

impl TryFrom<SyncSettings> for SyncConfig {
    type Error = ConfigError;

    fn try_from(settings: SyncSettings) -> Result<Self, Self::Error> {
        let interval = positive("-i/--interval", settings.interval_ms, " (ms)")?;
        let main_blocks = positive(
            "-m/--main-blocks-per-query",
            settings.main_blocks_per_query,
            "",
        )?;
        let initial_blocks = positive(
            "-n/--initial-blocks-per-query",
            settings.initial_blocks_per_query,
            "",
        )?;
        let initial_interval = positive(
            "-q/--initial-query-interval",
            settings.initial_query_interval_ms,
            " (ms)",
        )?;
        let request_timeout = positive("--request-timeout", settings.request_timeout_ms, " (ms)")?;
        let backoff = positive("--retry-backoff", settings.retry_backoff_ms, " (ms)")?;
        if settings.max_retry_backoff_ms < backoff {
            return Err(ConfigError::InvalidValue {
                flag: "--max-retry-backoff",
                reason: format!(
                    "should not be lower than --retry-backoff ({backoff} ms), got {}",
                    settings.max_retry_backoff_ms
                ),
            });
        }

        Ok(Self {
            finality: settings.finality,
            backfill: PhaseConfig {
                blocks_per_query: initial_blocks,
                interval: Duration::from_millis(initial_interval),
            },
            incremental: PhaseConfig {
                blocks_per_query: main_blocks,
                interval: Duration::from_millis(interval),
            },
            retry: RetryConfig {
                request_timeout: Duration::from_millis(request_timeout),
                max_retries: settings.max_retries,
                initial_backoff: Duration::from_millis(backoff),
                max_backoff: Duration::from_millis(settings.max_retry_backoff_ms),
            },
        })
    }
}

/// Accepts only `0x` followed by exactly 40 hex characters.
pub fn parse_contract_address(value: &str) -> Result<Address, ConfigError> {
    let invalid = || ConfigError::InvalidContractAddress(value.to_string());
    let hex = value.strip_prefix("0x").ok_or_else(invalid)?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Address::from_str(value).map_err(|_| invalid())
}

pub fn parse_rpc_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidRpcUrl {
        url: value.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidRpcUrl {
            url: value.to_string(),
            reason: format!("unsupported scheme {scheme:?}, expected http or https"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::try_from(SyncSettings::default()).unwrap();
        assert_eq!(config.finality, 0);
        assert_eq!(config.backfill.blocks_per_query, 1000);
        assert_eq!(config.backfill.interval, Duration::from_millis(50));
        assert_eq!(config.incremental.blocks_per_query, 1000);
        assert_eq!(config.incremental.interval, Duration::from_millis(5000));
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_zero_values_are_rejected_with_flag_named() {
        let cases: [(SyncSettings, &str); 6] = [
            (
                SyncSettings {
                    interval_ms: 0,
                    ..Default::default()
                },
                "-i/--interval",
            ),
            (
                SyncSettings {
                    main_blocks_per_query: 0,
                    ..Default::default()
                },
                "-m/--main-blocks-per-query",
            ),
            (
                SyncSettings {
                    initial_blocks_per_query: 0,
                    ..Default::default()
                },
                "-n/--initial-blocks-per-query",
            ),
            (
                SyncSettings {
                    initial_query_interval_ms: 0,
                    ..Default::default()
                },
                "-q/--initial-query-interval",
            ),
            (
                SyncSettings {
                    request_timeout_ms: 0,
                    ..Default::default()
                },
                "--request-timeout",
            ),
            (
                SyncSettings {
                    retry_backoff_ms: 0,
                    ..Default::default()
                },
                "--retry-backoff",
            ),
        ];

        for (settings, expected_flag) in cases {
            match SyncConfig::try_from(settings) {
                Err(ConfigError::InvalidValue { flag, .. }) => assert_eq!(flag, expected_flag),
                other => panic!("expected rejection of {expected_flag}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_max_backoff_below_initial_is_rejected() {
        let settings = SyncSettings {
            retry_backoff_ms: 1000,
            max_retry_backoff_ms: 999,
            ..Default::default()
        };
        let err = SyncConfig::try_from(settings).unwrap_err();
        assert!(err.to_string().contains("--max-retry-backoff"));
    }

    #[test]
    fn test_finality_zero_is_allowed() {
        let settings = SyncSettings {
            finality: 0,
            max_retries: 0,
            ..Default::default()
        };
        let config = SyncConfig::try_from(settings).unwrap();
        assert_eq!(config.finality, 0);
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            request_timeout: Duration::from_secs(1),
            max_retries: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
        };
        assert_eq!(retry.backoff_for(0), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(3000));
        assert_eq!(retry.backoff_for(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_contract_address_parsing() {
        let address = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
        assert_eq!(
            parse_contract_address(address).unwrap(),
            Address::from_str(address).unwrap()
        );

        for bad in [
            "5FbDB2315678afecb367f032d93F642f64180aa3",
            "0x5FbDB2315678afecb367f032d93F642f64180aa",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3ff",
            "0xZZbDB2315678afecb367f032d93F642f64180aa3",
            "",
        ] {
            assert_eq!(
                parse_contract_address(bad),
                Err(ConfigError::InvalidContractAddress(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rpc_url_parsing() {
        assert_eq!(
            parse_rpc_url(DEFAULT_RPC_URL).unwrap().as_str(),
            "http://127.0.0.1:8545/"
        );
        assert!(parse_rpc_url("not a url").is_err());
        assert!(parse_rpc_url("ftp://node.example").is_err());
    }
}
