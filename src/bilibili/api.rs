//! 動画情報・字幕・コメントの取得
//!
//! [`BiliClient`] の上にレスポンスキャッシュを重ねた型付きの操作。
//! 失敗時に代替値を返すことはしない（説明文へのフォールバックなどは呼び出し側の責務）。

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::bvid::normalize_bvid;
use super::client::BiliClient;
use super::errors::BiliError;
use super::types::{CommentPage, PlayerInfo, SubtitleContent, SubtitleTrack, VideoInfo};
use crate::cache::{CacheStats, RequestFingerprint, ResponseCache};
use crate::config::DEFAULT_CACHE_CAPACITY;

const VIEW_PATH: &str = "/x/web-interface/view";
const PLAYER_PATH: &str = "/x/player/wbi/v2";
const REPLY_PATH: &str = "/x/v2/reply";

/// コメント対象の種類（1 = 動画）
const REPLY_TYPE_VIDEO: &str = "1";
/// 並び順（1 = いいね順）
const REPLY_SORT_HOT: &str = "1";
/// 1ページあたりの最大件数
const MAX_PAGE_SIZE: u32 = 49;

#[derive(Debug)]
pub struct BilibiliApi {
    client: Arc<BiliClient>,
    cache: ResponseCache,
}

impl BilibiliApi {
    pub fn new(client: Arc<BiliClient>) -> Self {
        let config = client.config();
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        let cache = ResponseCache::new(capacity, config.metadata_ttl(), config.comments_ttl());
        Self { client, cache }
    }

    pub fn client(&self) -> &Arc<BiliClient> {
        &self.client
    }

    /// 動画の基本情報（キャッシュ優先）
    pub async fn get_video_info(&self, bvid_or_url: &str) -> Result<VideoInfo, BiliError> {
        let bvid = normalize_bvid(bvid_or_url)?;
        let key = RequestFingerprint::new("video_info", &bvid);

        if let Some(cached) = self.cache.get_video_info(&key).await {
            return Ok(cached);
        }

        log::info!("Fetching video info for {}", bvid);
        let data = self
            .client
            .fetch_unsigned(VIEW_PATH, &[("bvid", bvid.as_str())])
            .await?;
        let info: VideoInfo = decode(data, "video info")?;

        self.cache.set_video_info(&key, info.clone()).await;
        Ok(info)
    }

    /// 字幕トラック一覧（字幕がない動画は空）
    pub async fn get_video_subtitles(
        &self,
        bvid_or_url: &str,
        cid: u64,
    ) -> Result<Vec<SubtitleTrack>, BiliError> {
        let bvid = normalize_bvid(bvid_or_url)?;
        let cid = cid.to_string();

        log::info!("Fetching subtitle list for {} (cid: {})", bvid, cid);
        let data = self
            .client
            .fetch_signed(PLAYER_PATH, &[("bvid", bvid.as_str()), ("cid", cid.as_str())])
            .await?;
        let player: PlayerInfo = decode(data, "player info")?;

        log::debug!("Found {} subtitle track(s)", player.subtitle.subtitles.len());
        Ok(player.subtitle.subtitles)
    }

    /// 字幕本体
    pub async fn get_subtitle_content(&self, subtitle_url: &str) -> Result<SubtitleContent, BiliError> {
        if subtitle_url.trim().is_empty() {
            return Err(BiliError::InvalidInput("Subtitle URL cannot be empty".to_string()));
        }
        let data = self.client.fetch_raw(subtitle_url.trim()).await?;
        decode(data, "subtitle content")
    }

    /// コメント一覧（キャッシュ優先）
    ///
    /// `aid` は動画情報の `aid`。`page` は1始まり。
    pub async fn get_video_comments(
        &self,
        aid: u64,
        page: u32,
        page_size: u32,
    ) -> Result<CommentPage, BiliError> {
        if aid == 0 {
            return Err(BiliError::InvalidInput("aid must be positive".to_string()));
        }
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let key = RequestFingerprint::new("comments", aid)
            .param("pn", page)
            .param("ps", page_size);
        if let Some(cached) = self.cache.get_comments(&key).await {
            return Ok(cached);
        }

        log::info!("Fetching comments for aid {} (page {}, size {})", aid, page, page_size);
        let oid = aid.to_string();
        let pn = page.to_string();
        let ps = page_size.to_string();
        let data = self
            .client
            .fetch_unsigned(
                REPLY_PATH,
                &[
                    ("oid", oid.as_str()),
                    ("type", REPLY_TYPE_VIDEO),
                    ("sort", REPLY_SORT_HOT),
                    ("pn", pn.as_str()),
                    ("ps", ps.as_str()),
                ],
            )
            .await?;
        let comments: CommentPage = decode(data, "comment page")?;

        self.cache.set_comments(&key, comments.clone()).await;
        Ok(comments)
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T, BiliError> {
    serde_json::from_value(data)
        .map_err(|e| BiliError::Structural(format!("Failed to parse {}: {}", what, e)))
}
