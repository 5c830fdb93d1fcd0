use std::future::Future;
use std::time::Duration;

use super::errors::BiliError;

/// 1回の試行を締め切り時間で打ち切るガード
///
/// 締め切りを過ぎると実行中のFutureをdropしてキャンセルする。
/// タイマーは `tokio::time::timeout` が所有するため、成功・失敗・タイムアウトの
/// どの経路でも解放される。
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Duration,
}

impl TimeoutGuard {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn run<T, F>(&self, op: F) -> Result<T, BiliError>
    where
        F: Future<Output = Result<T, BiliError>>,
    {
        match tokio::time::timeout(self.deadline, op).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let timeout_ms = self.deadline.as_millis() as u64;
                log::warn!("Request attempt timed out after {}ms", timeout_ms);
                Err(BiliError::Timeout { timeout_ms })
            }
        }
    }
}
