//! WBI署名モジュール
//!
//! navエンドポイントが返す2つの画像URLから鍵の断片を取り出し、
//! 固定の並べ替え表で混合した `mix_key` を使ってリクエストに署名する。
//!
//! ## 注意事項
//! - 鍵は定期的にローテーションされるため、一定時間でキャッシュを破棄する
//! - ソート順・区切り文字・ハッシュ方式のいずれかがずれると、
//!   ローカルではエラーにならず上流で認可エラーとして返ってくる

use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::errors::BiliError;

/// 署名パラメータ名
pub const SIGNATURE_PARAM: &str = "w_rid";
/// 署名に含めるタイムスタンプのパラメータ名（UNIX秒）
pub const TIMESTAMP_PARAM: &str = "wts";

/// 鍵の混合に使う並べ替え表（0..63をちょうど1回ずつ使う）
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

// 正規表現のシングルトン（OnceLockで初回のみコンパイル）
static KEY_FRAGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn get_key_fragment_regex() -> &'static Regex {
    KEY_FRAGMENT_RE.get_or_init(|| {
        // 最後のパスセグメントのうち、拡張子の直前まで
        Regex::new(r"/([^/?#]+)\.[A-Za-z0-9]+(?:[?#].*)?$")
            .expect("Failed to compile key fragment regex")
    })
}

/// 署名鍵一式
#[derive(Debug, Clone)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
    pub mix_key: String,
    pub expires_at: Instant,
}

impl WbiKeys {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// URLから鍵の断片を抽出
///
/// `https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png`
/// → `7cd084941338484aae1ad9425b84077c`
pub fn extract_key_fragment(url: &str) -> Option<&str> {
    get_key_fragment_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|fragment| !fragment.is_empty())
}

/// 2つの断片を連結し、並べ替え表に従って `mix_key` を生成
///
/// 連結結果が64文字に満たない場合は範囲外の位置を読み飛ばす。
pub fn mix_key(img_key: &str, sub_key: &str) -> String {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| raw.get(i))
        .collect()
}

/// パラメータに署名する
///
/// 名前の辞書順に `key=value` を `&` で連結し、末尾に `mix_key` を付けて
/// MD5（小文字16進）を計算する。戻り値は元のパラメータ＋`wts`＋`w_rid`。
pub fn sign(params: &[(String, String)], mix_key: &str, wts: i64) -> Vec<(String, String)> {
    let mut signed: Vec<(String, String)> = params
        .iter()
        .filter(|(key, _)| key != SIGNATURE_PARAM && key != TIMESTAMP_PARAM)
        .cloned()
        .collect();
    signed.push((TIMESTAMP_PARAM.to_string(), wts.to_string()));
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    let query = signed
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let digest = md5::compute(format!("{}{}", query, mix_key));
    signed.push((SIGNATURE_PARAM.to_string(), format!("{:x}", digest)));
    signed
}

/// navレスポンスから鍵一式を組み立てる
///
/// navはログインしていない場合も `code=-101` と一緒に `wbi_img` を返すため、
/// エンベロープのコードは見ない。
pub fn keys_from_nav(nav: &Value, ttl: Duration, now: Instant) -> Result<WbiKeys, BiliError> {
    let wbi_img = nav
        .get("data")
        .and_then(|data| data.get("wbi_img"))
        .ok_or_else(|| BiliError::Structural("nav response has no data.wbi_img".to_string()))?;

    let fragment = |field: &str| -> Result<String, BiliError> {
        let url = wbi_img
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| BiliError::Structural(format!("wbi_img.{} is missing", field)))?;
        extract_key_fragment(url)
            .map(str::to_string)
            .ok_or_else(|| {
                BiliError::Structural(format!("wbi_img.{} has unexpected shape: {}", field, url))
            })
    };

    let img_key = fragment("img_url")?;
    let sub_key = fragment("sub_url")?;
    let mix_key = mix_key(&img_key, &sub_key);

    Ok(WbiKeys {
        img_key,
        sub_key,
        mix_key,
        expires_at: now + ttl,
    })
}

/// 署名鍵のキャッシュ
#[derive(Debug)]
pub struct WbiKeyProvider {
    cached: RwLock<Option<WbiKeys>>,
    ttl: Duration,
}

impl WbiKeyProvider {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cached: RwLock::new(None),
            ttl,
        }
    }

    /// 有効な鍵を返す。期限切れまたは未取得の場合は `fetch_nav` で取り直す
    ///
    /// 同時にキャッシュミスした場合は両方が取得し、後勝ちで保存される。
    pub async fn get_key<F, Fut>(&self, fetch_nav: F) -> Result<WbiKeys, BiliError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, BiliError>>,
    {
        if let Some(keys) = self.cached().await {
            return Ok(keys);
        }

        log::info!("WBI keys missing or expired, fetching nav");
        let nav = fetch_nav().await?;
        let keys = keys_from_nav(&nav, self.ttl, Instant::now())?;
        log::debug!(
            "WBI keys refreshed (img: {}, sub: {}, ttl: {}s)",
            crate::util::mask_secret(&keys.img_key),
            crate::util::mask_secret(&keys.sub_key),
            self.ttl.as_secs()
        );

        *self.cached.write().await = Some(keys.clone());
        Ok(keys)
    }

    /// 期限内のキャッシュ済み鍵を取得
    pub async fn cached(&self) -> Option<WbiKeys> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|keys| !keys.is_expired(Instant::now()))
            .cloned()
    }

    /// キャッシュを破棄（次回の `get_key` で必ず取り直す）
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        log::debug!("WBI key cache invalidated");
    }
}
