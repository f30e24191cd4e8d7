//! 指数退避计算。
//!
//! 存储写入与连接重建共用：`delay(n)` 给出第 n 次重试前的等待时长，
//! 按倍率递增并压在上限之内。

use std::time::Duration;

/// 退避参数。
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub min_ms: u64,
    pub max_ms: u64,
    pub factor: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min_ms: 200,
            max_ms: 5_000,
            factor: 2,
        }
    }
}

impl Backoff {
    /// 第 `attempt` 次重试前的等待时长（attempt 从 0 计）。
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1);
        let mut delay = self.min_ms.max(1);
        for _ in 0..attempt {
            delay = delay.saturating_mul(factor);
            if delay >= self.max_ms {
                delay = self.max_ms;
                break;
            }
        }
        Duration::from_millis(delay.min(self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let backoff = Backoff {
            min_ms: 100,
            max_ms: 1_000,
            factor: 2,
        };
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(2).as_millis(), 400);
        assert_eq!(backoff.delay(10).as_millis(), 1_000);
    }
}
