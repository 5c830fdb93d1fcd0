use rand::Rng;
use std::time::Duration;

/// ジッター倍率の範囲 [1.0, 1.2)
const JITTER_MIN: f64 = 1.0;
const JITTER_MAX: f64 = 1.2;

/// 指数バックオフを管理する構造体
/// エラー時のリトライ間隔を指数的に増加させる（2s→4s→8s...、上限あり）
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// 新しいExponentialBackoffインスタンスを作成
    ///
    /// デフォルト設定:
    /// - base_delay: 1秒
    /// - max_delay: 10秒
    pub fn new() -> Self {
        Self::with_config(Duration::from_secs(1), Duration::from_secs(10))
    }

    /// カスタム設定でExponentialBackoffインスタンスを作成
    pub fn with_config(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            current_attempt: 0,
        }
    }

    /// 次のリトライまでの待機時間を計算して返す（ジッター付き）
    ///
    /// 呼び出すたびに試行回数を1つ進め、進めた後の回数で計算する。
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        self.next_delay_with_jitter(jitter)
    }

    /// 指定したジッター倍率で待機時間を計算
    ///
    /// 計算式: min(base_delay * 2^current_attempt * jitter, max_delay)
    pub fn next_delay_with_jitter(&mut self, jitter: f64) -> Duration {
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay_for_attempt(self.current_attempt, self.base_delay, self.max_delay, jitter)
    }

    /// これまでに払い出したリトライ回数
    pub fn attempt_count(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

fn delay_for_attempt(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    // 2^attempt はオーバーフローしないよう上限付きで計算
    let factor = 2f64.powi(attempt.min(30) as i32);
    let millis = base.as_millis() as f64 * factor * jitter;
    let max_millis = max.as_millis() as f64;
    Duration::from_millis(millis.min(max_millis) as u64)
}
