// =============================================================================
// レスポンスキャッシュ
// =============================================================================
// 動画情報（1時間）とコメント（30分）を別々のLRUパーティションでキャッシュし、
// 同じリクエストによるAPIコールを削減する
// =============================================================================

use lru::LruCache;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::bilibili::types::{CommentPage, VideoInfo};

/// キャッシュキー
///
/// 操作の種類・対象ID・可変パラメータから決定的に組み立てる。
/// パラメータは名前順に並ぶため、渡した順序によらず同じキーになる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    kind: String,
    subject: String,
    params: BTreeMap<String, String>,
}

impl RequestFingerprint {
    pub fn new(kind: &str, subject: impl fmt::Display) -> Self {
        Self {
            kind: kind.to_string(),
            subject: subject.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.subject)?;
        if !self.params.is_empty() {
            let joined = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            write!(f, ":{}", joined)?;
        }
        Ok(())
    }
}

/// キャッシュエントリ
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    /// キャッシュされたデータ
    value: V,
    /// キャッシュ作成時刻
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// 期限切れかどうかを判定（挿入からちょうどTTL経過した時点で期限切れ）
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// 容量とTTLで上限を設けたLRUキャッシュ
///
/// 期限切れは読み出し時にのみ判定する（定期的な掃除はしない）。
#[derive(Debug)]
pub struct TtlLruCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    name: &'static str,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(name: &'static str, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            name,
        }
    }

    /// 有効なエントリを取得（ヒット時は最近使用として扱う）
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                log::debug!("{} cache hit: {}", self.name, key);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            log::debug!("{} cache expired: {}", self.name, key);
            entries.pop(key);
        } else {
            log::debug!("{} cache miss: {}", self.name, key);
        }
        None
    }

    /// 挿入または上書き（満杯の場合は最も古く使われたエントリを追い出す）
    pub async fn set(&self, key: String, value: V) {
        let mut entries = self.entries.lock().await;
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl: self.ttl,
        };
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                log::debug!("{} cache evicted: {}", self.name, evicted);
            }
        }
        log::debug!("{} cache stored: {} (TTL: {}s)", self.name, key, self.ttl.as_secs());
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.pop(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        log::debug!("{} cache cleared", self.name);
    }

    /// 保持中のエントリ数（期限切れ未回収分を含む）
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// キャッシュ統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl StatCounters {
    fn record_lookup<T>(&self, found: &Option<T>) {
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }
}

/// 動画情報とコメントの2パーティション構成のキャッシュ
#[derive(Debug)]
pub struct ResponseCache {
    videos: TtlLruCache<VideoInfo>,
    comments: TtlLruCache<CommentPage>,
    stats: StatCounters,
}

impl ResponseCache {
    pub fn new(capacity: NonZeroUsize, metadata_ttl: Duration, comments_ttl: Duration) -> Self {
        Self {
            videos: TtlLruCache::new("Video", capacity, metadata_ttl),
            comments: TtlLruCache::new("Comment", capacity, comments_ttl),
            stats: StatCounters::default(),
        }
    }

    pub async fn get_video_info(&self, key: &RequestFingerprint) -> Option<VideoInfo> {
        let found = self.videos.get(&key.to_string()).await;
        self.stats.record_lookup(&found);
        found
    }

    pub async fn set_video_info(&self, key: &RequestFingerprint, value: VideoInfo) {
        self.videos.set(key.to_string(), value).await;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn delete_video_info(&self, key: &RequestFingerprint) {
        self.videos.delete(&key.to_string()).await;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn get_comments(&self, key: &RequestFingerprint) -> Option<CommentPage> {
        let found = self.comments.get(&key.to_string()).await;
        self.stats.record_lookup(&found);
        found
    }

    pub async fn set_comments(&self, key: &RequestFingerprint, value: CommentPage) {
        self.comments.set(key.to_string(), value).await;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn delete_comments(&self, key: &RequestFingerprint) {
        self.comments.delete(&key.to_string()).await;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// 両パーティションと統計をリセット
    pub async fn clear(&self) {
        self.videos.clear().await;
        self.comments.clear().await;
        self.stats.reset();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
        }
    }
}
