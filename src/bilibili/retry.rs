//! リトライ実行モジュール
//!
//! 失敗の種類（[`ErrorKind`]）とHTTPステータスだけを見てリトライ可否を判定し、
//! 指数バックオフ＋ジッターで待機してから再試行する。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::backoff::ExponentialBackoff;
use super::errors::{BiliError, ErrorKind};

/// リトライ方針
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大リトライ回数（初回の試行は含まない）
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_kinds: Vec<ErrorKind>,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            retryable_kinds: vec![ErrorKind::Transport, ErrorKind::Timeout],
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// リトライしない方針
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 種類が許可されているか、ステータスが許可リストにあればリトライ可能
    pub fn is_retryable(&self, err: &BiliError) -> bool {
        self.retryable_kinds.contains(&err.kind())
            || err
                .status()
                .is_some_and(|status| self.retryable_statuses.contains(&status))
    }
}

/// 累積統計のスナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// リトライ実行器
#[derive(Debug, Default)]
pub struct RetryExecutor {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `attempt_fn` を実行し、リトライ可能な失敗であれば再試行する
    ///
    /// リトライを使い切った場合やリトライ不可の失敗は、最後のエラーをそのまま返す。
    pub async fn run<T, F, Fut>(&self, policy: &RetryPolicy, mut attempt_fn: F) -> Result<T, BiliError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BiliError>>,
    {
        let mut backoff = ExponentialBackoff::with_config(policy.base_delay, policy.max_delay);

        loop {
            self.attempts.fetch_add(1, Ordering::Relaxed);

            match attempt_fn().await {
                Ok(value) => {
                    self.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => {
                    let retries = backoff.attempt_count();
                    if retries >= policy.max_retries || !policy.is_retryable(&err) {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        if retries > 0 {
                            log::warn!("Giving up after {} attempt(s): {}", retries + 1, err);
                        }
                        return Err(err);
                    }

                    // 待機時間は次に行う試行の番号（1始まり）で決まる
                    let delay = backoff.next_delay();
                    log::info!(
                        "Attempt failed ({}), retrying {}/{} after {}ms",
                        err,
                        backoff.attempt_count(),
                        policy.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}
