//! リクエスト開始間隔を制御するゲート
//!
//! プロセス全体で1つのゲートを共有し、上流のレート制限に合わせて
//! リクエストの「開始」だけを直列化する。完了は待たないため、
//! 許可済みのリクエスト同士は並行して実行され得る。

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 開始間隔ゲート
#[derive(Debug)]
pub struct RequestGate {
    /// 最小開始間隔
    min_interval: Duration,
    /// 直前の許可時刻（Mutexの待ち行列がそのまま順番待ちのキューになる）
    last_admission: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admission: Mutex::new(None),
        }
    }

    /// 前回の許可から `min_interval` 以上経過するまで待機して許可を得る
    ///
    /// tokioのMutexは到着順（FIFO）で取得されるため、
    /// 同時に呼び出した場合も到着順に1つずつ許可される。
    pub async fn acquire(&self) {
        let mut last = self.last_admission.lock().await;

        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            let now = Instant::now();
            if next_allowed > now {
                let wait = next_allowed - now;
                log::debug!("Request gate: waiting {}ms for admission", wait.as_millis());
                tokio::time::sleep_until(next_allowed).await;
            }
        }

        // 許可時刻で更新（完了時刻ではない）
        *last = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
