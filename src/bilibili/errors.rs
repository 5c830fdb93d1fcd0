use thiserror::Error;

/// エラー分類（リトライ判定はこの値とステータスコードのみで行う）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Structural,
    ContentRestricted,
    CommentsDisabled,
    Upstream,
    InvalidInput,
}

#[derive(Error, Debug)]
pub enum BiliError {
    #[error("HTTP request failed (status: {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Unexpected upstream payload shape: {0}")]
    Structural(String),

    #[error("Content is restricted (code {code}): {message}")]
    ContentRestricted { code: i64, message: String },

    #[error("Comments are disabled (code {code}): {message}")]
    CommentsDisabled { code: i64, message: String },

    #[error("Bilibili API error (code {code}): {message}")]
    Upstream { code: i64, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BiliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BiliError::Transport { .. } => ErrorKind::Transport,
            BiliError::Timeout { .. } => ErrorKind::Timeout,
            BiliError::Structural(_) => ErrorKind::Structural,
            BiliError::ContentRestricted { .. } => ErrorKind::ContentRestricted,
            BiliError::CommentsDisabled { .. } => ErrorKind::CommentsDisabled,
            BiliError::Upstream { .. } => ErrorKind::Upstream,
            BiliError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// HTTPステータスコード（トランスポート層のエラーのみ）
    pub fn status(&self) -> Option<u16> {
        match self {
            BiliError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BiliError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest側のタイムアウトはクライアント設定値を知らないため0とする
            return BiliError::Timeout { timeout_ms: 0 };
        }
        if err.is_builder() {
            // 不正なヘッダー値やURLはリクエストを組み立てた時点で失敗する
            return BiliError::InvalidInput(format!("Failed to build request: {}", err));
        }
        if err.is_decode() {
            return BiliError::Structural(format!("Failed to decode response body: {}", err));
        }
        BiliError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// コメント欄が閉じられている場合の上流メッセージ
pub const COMMENTS_DISABLED_MESSAGE: &str = "评论区已关闭";

/// エンベロープのエラーコード対応表の1行
struct EnvelopeRule {
    code: i64,
    /// `None` の場合はメッセージを問わない
    message_pattern: Option<&'static str>,
    kind: ErrorKind,
}

/// 上から順に評価し、最初に一致した行を採用する
const ENVELOPE_RULES: &[EnvelopeRule] = &[
    EnvelopeRule {
        code: 12002,
        message_pattern: None,
        kind: ErrorKind::CommentsDisabled,
    },
    EnvelopeRule {
        code: -404,
        message_pattern: Some(COMMENTS_DISABLED_MESSAGE),
        kind: ErrorKind::CommentsDisabled,
    },
    EnvelopeRule {
        code: -403,
        message_pattern: None,
        kind: ErrorKind::ContentRestricted,
    },
    // 稿件不可见
    EnvelopeRule {
        code: 62002,
        message_pattern: None,
        kind: ErrorKind::ContentRestricted,
    },
    // 仅UP主自己可见
    EnvelopeRule {
        code: 62012,
        message_pattern: None,
        kind: ErrorKind::ContentRestricted,
    },
];

/// 0以外のエンベロープコードをドメインエラーに変換
pub fn classify_envelope_error(code: i64, message: &str) -> BiliError {
    let kind = ENVELOPE_RULES
        .iter()
        .find(|rule| {
            rule.code == code
                && rule
                    .message_pattern
                    .map_or(true, |pattern| message.contains(pattern))
        })
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::Upstream);

    let message = message.to_string();
    match kind {
        ErrorKind::CommentsDisabled => BiliError::CommentsDisabled { code, message },
        ErrorKind::ContentRestricted => BiliError::ContentRestricted { code, message },
        _ => BiliError::Upstream { code, message },
    }
}
