/// 秘密情報をマスキングしてログ出力用の文字列を生成
///
/// 最初の4文字と最後の4文字のみを表示し、中間を***でマスキング
///
/// # Examples
/// ```
/// use bilibili_core::util::mask_secret;
/// let masked = mask_secret("7cd084941338484aae1ad9425b84077c");
/// assert_eq!(masked, "7cd0***077c");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len <= 8 {
        // 短い値は全体をマスク
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[len - 4..].iter().collect();
    format!("{}***{}", prefix, suffix)
}

/// スキームのないURL（`//i0.hdslb.com/...`）に `https:` を補う
pub fn ensure_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        format!("https://{}", url)
    }
}
