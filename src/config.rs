// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// リクエスト基盤全体で使用する設定値・デフォルト値を定義
// =============================================================================

use std::time::Duration;
use thiserror::Error;

use crate::bilibili::retry::RetryPolicy;

/// APIのベースURL
pub const DEFAULT_BASE_URL: &str = "https://api.bilibili.com";

/// クライアント識別文字列
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 参照元ページ
pub const DEFAULT_REFERER: &str = "https://www.bilibili.com";

/// リクエスト開始間隔（ミリ秒）
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 500;

/// HTTPリクエストのデフォルトタイムアウト（ミリ秒）
///
/// 上流がハングした場合でも適切にタイムアウトし、
/// 呼び出し側を長時間待たせないようにする。
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// WBI鍵のキャッシュ期間（1時間）
pub const DEFAULT_KEY_CACHE_TTL_MS: u64 = 60 * 60 * 1000;

/// レスポンスキャッシュの最大エントリ数（パーティションごと）
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// 動画情報キャッシュのTTL（1時間）
pub const DEFAULT_METADATA_TTL_MS: u64 = 60 * 60 * 1000;

/// コメントキャッシュのTTL（30分）
pub const DEFAULT_COMMENTS_TTL_MS: u64 = 30 * 60 * 1000;

const ENV_RATE_LIMIT_MS: &str = "BILIBILI_RATE_LIMIT_MS";
const ENV_REQUEST_TIMEOUT_MS: &str = "BILIBILI_REQUEST_TIMEOUT_MS";
const ENV_CACHE_SIZE: &str = "BILIBILI_CACHE_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// 設定一式
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    pub referer: String,
    pub min_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub key_cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub metadata_ttl_ms: u64,
    pub comments_ttl_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            key_cache_ttl_ms: DEFAULT_KEY_CACHE_TTL_MS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            metadata_ttl_ms: DEFAULT_METADATA_TTL_MS,
            comments_ttl_ms: DEFAULT_COMMENTS_TTL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// 環境変数でデフォルト値を上書きした設定を作成
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の取得関数で上書き（テスト用に環境変数から切り離している）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_RATE_LIMIT_MS) {
            config.min_interval_ms = parse_value(ENV_RATE_LIMIT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = parse_value(ENV_REQUEST_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_CACHE_SIZE) {
            let size: usize = parse_value(ENV_CACHE_SIZE, &value)?;
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_CACHE_SIZE.to_string(),
                    value,
                });
            }
            config.cache_capacity = size;
        }

        log::debug!(
            "Config loaded (interval: {}ms, timeout: {}ms, cache: {})",
            config.min_interval_ms,
            config.request_timeout_ms,
            config.cache_capacity
        );
        Ok(config)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.key_cache_ttl_ms)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_ttl_ms)
    }

    pub fn comments_ttl(&self) -> Duration {
        Duration::from_millis(self.comments_ttl_ms)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
