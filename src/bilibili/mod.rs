//! Bilibili API リクエスト基盤
//!
//! 上流のレート制限・WBI署名・一時的な障害への対応をまとめて扱う。
//!
//! ## 構成
//! - [`gate`]: リクエスト開始間隔の制御（プロセス全体で1つ）
//! - [`timeout`]: 1回の試行の締め切り
//! - [`wbi`]: 署名鍵の取得・キャッシュと署名
//! - [`retry`]: 指数バックオフ付きのリトライ
//! - [`client`]: 上記を組み合わせたAPIクライアント
//! - [`api`]: キャッシュ付きの型付き操作

pub mod api;
pub mod backoff;
pub mod bvid;
pub mod client;
pub mod errors;
pub mod gate;
pub mod retry;
pub mod timeout;
pub mod types;
pub mod wbi;

pub use api::BilibiliApi;
pub use client::BiliClient;
pub use errors::{BiliError, ErrorKind};
pub use retry::{RetryExecutor, RetryPolicy, RetryStats};
pub use types::*;
