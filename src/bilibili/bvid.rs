//! BV号ユーティリティ

use regex::Regex;
use std::sync::OnceLock;

use super::errors::BiliError;

static BVID_RE: OnceLock<Regex> = OnceLock::new();

fn get_bvid_regex() -> &'static Regex {
    BVID_RE.get_or_init(|| Regex::new(r"BV[A-Za-z0-9]{10}").expect("Failed to compile BV id regex"))
}

/// BV号そのもの（`BV` + 英数字10文字）かどうか
pub fn is_valid_bvid(bvid: &str) -> bool {
    bvid.len() == 12 && get_bvid_regex().is_match(bvid)
}

/// BV号または動画URLからBV号を取り出す
pub fn extract_bvid(input: &str) -> Result<&str, BiliError> {
    if input.is_empty() {
        return Err(BiliError::InvalidInput("Input cannot be empty".to_string()));
    }
    get_bvid_regex()
        .find(input)
        .map(|m| m.as_str())
        .ok_or_else(|| BiliError::InvalidInput(format!("Invalid Bilibili video ID or URL: {}", input)))
}

/// 前後の空白を除いてBV号を取り出す
///
/// BV号は大文字小文字を区別するため、大文字化などの変換は行わない。
pub fn normalize_bvid(input: &str) -> Result<String, BiliError> {
    extract_bvid(input.trim()).map(str::to_string)
}

/// 動画ページのURL
pub fn video_url(bvid: &str) -> Result<String, BiliError> {
    Ok(format!("https://www.bilibili.com/video/{}", normalize_bvid(bvid)?))
}
