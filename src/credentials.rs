//! 認証情報プロバイダ
//!
//! リクエスト基盤からは [`CredentialProvider`] としてのみ参照される。
//! Cookieの中身を組み立てるのはこのモジュールの責務で、基盤側は
//! 返されたヘッダーをそのまま付与するだけ。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// アプリケーション識別子（サービス名として使用）
const SERVICE_NAME: &str = "com.bilibili-fetch-core";

/// 認証情報用のエントリ名
const CREDENTIALS_ENTRY: &str = "bilibili_cookies";

/// 環境変数から読み込んだ認証情報の有効期間（日）
const CREDENTIAL_LIFETIME_DAYS: i64 = 30;

const ENV_SESSDATA: &str = "BILIBILI_SESSDATA";
const ENV_BILI_JCT: &str = "BILIBILI_BILI_JCT";
const ENV_DEDEUSERID: &str = "BILIBILI_DEDEUSERID";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    KeyringError(#[from] keyring::Error),

    #[error("Stored credentials are corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    #[error("Credentials not found")]
    NotFound,
}

/// 認証情報の提供元
pub trait CredentialProvider: Send + Sync {
    /// リクエストに付与する認証ヘッダー（未ログインなら空）
    fn auth_headers(&self) -> HashMap<String, String>;

    fn is_logged_in(&self) -> bool;
}

/// 未ログイン
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn auth_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn is_logged_in(&self) -> bool {
        false
    }
}

/// Cookie認証情報
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookieCredentials {
    pub sessdata: String,
    pub bili_jct: String,
    pub dedeuserid: String,
    pub expires_at: DateTime<Utc>,
}

impl CookieCredentials {
    pub fn new(sessdata: String, bili_jct: String, dedeuserid: String) -> Self {
        Self {
            sessdata,
            bili_jct,
            dedeuserid,
            expires_at: Utc::now() + ChronoDuration::days(CREDENTIAL_LIFETIME_DAYS),
        }
    }

    /// 環境変数から読み込む（3つ揃っていない場合はNone）
    pub fn from_env() -> Option<Self> {
        let sessdata = std::env::var(ENV_SESSDATA).ok().filter(|v| !v.is_empty())?;
        let bili_jct = std::env::var(ENV_BILI_JCT).ok().filter(|v| !v.is_empty())?;
        let dedeuserid = std::env::var(ENV_DEDEUSERID).ok().filter(|v| !v.is_empty())?;
        log::info!("Credentials loaded from environment variables");
        Some(Self::new(sessdata, bili_jct, dedeuserid))
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Cookieヘッダーの値
    pub fn cookie_header(&self) -> String {
        format!(
            "SESSDATA={}; bili_jct={}; DedeUserID={}",
            self.sessdata, self.bili_jct, self.dedeuserid
        )
    }
}

impl std::fmt::Debug for CookieCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCredentials")
            .field("sessdata", &crate::util::mask_secret(&self.sessdata))
            .field("bili_jct", &crate::util::mask_secret(&self.bili_jct))
            .field("dedeuserid", &self.dedeuserid)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// メモリ上に保持する認証情報
#[derive(Debug, Default)]
pub struct StaticCredentials {
    credentials: RwLock<Option<CookieCredentials>>,
}

impl StaticCredentials {
    pub fn new(credentials: Option<CookieCredentials>) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    pub fn from_env() -> Self {
        Self::new(CookieCredentials::from_env())
    }

    pub fn set(&self, credentials: Option<CookieCredentials>) {
        if let Ok(mut guard) = self.credentials.write() {
            *guard = credentials;
        }
    }

    /// 有効な認証情報（期限切れはNone）
    fn current(&self) -> Option<CookieCredentials> {
        let guard = self.credentials.read().ok()?;
        match guard.as_ref() {
            Some(creds) if creds.is_expired() => {
                log::warn!("Credentials have expired");
                None
            }
            other => other.cloned(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn auth_headers(&self) -> HashMap<String, String> {
        self.current()
            .map(|creds| HashMap::from([("Cookie".to_string(), creds.cookie_header())]))
            .unwrap_or_default()
    }

    fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }
}

/// OSのセキュアストレージに保存する認証情報
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service API
#[derive(Debug)]
pub struct KeyringCredentials {
    entry_name: String,
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new(CREDENTIALS_ENTRY)
    }
}

impl KeyringCredentials {
    pub fn new(entry_name: &str) -> Self {
        Self {
            entry_name: entry_name.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, CredentialError> {
        Ok(Entry::new(SERVICE_NAME, &self.entry_name)?)
    }

    /// 認証情報をセキュアストレージに保存
    pub fn save(&self, credentials: &CookieCredentials) -> Result<(), CredentialError> {
        let payload = serde_json::to_string(credentials)?;
        self.entry()?.set_password(&payload)?;
        log::info!("Credentials saved to secure storage");
        Ok(())
    }

    /// 認証情報をセキュアストレージから取得
    pub fn load(&self) -> Result<CookieCredentials, CredentialError> {
        match self.entry()?.get_password() {
            Ok(payload) => {
                log::debug!("Credentials retrieved from secure storage");
                Ok(serde_json::from_str(&payload)?)
            }
            Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound),
            Err(e) => Err(CredentialError::KeyringError(e)),
        }
    }

    /// 認証情報をセキュアストレージから削除
    pub fn delete(&self) -> Result<(), CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) => {
                log::info!("Credentials deleted from secure storage");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                log::warn!("Attempted to delete non-existent credentials");
                Ok(()) // 既に存在しない場合も成功扱い
            }
            Err(e) => Err(CredentialError::KeyringError(e)),
        }
    }

    fn current(&self) -> Option<CookieCredentials> {
        match self.load() {
            Ok(creds) if !creds.is_expired() => Some(creds),
            Ok(_) => {
                log::warn!("Stored credentials have expired");
                None
            }
            Err(CredentialError::NotFound) => None,
            Err(e) => {
                log::error!("Failed to read credentials: {}", e);
                None
            }
        }
    }
}

impl CredentialProvider for KeyringCredentials {
    fn auth_headers(&self) -> HashMap<String, String> {
        self.current()
            .map(|creds| HashMap::from([("Cookie".to_string(), creds.cookie_header())]))
            .unwrap_or_default()
    }

    fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }
}
