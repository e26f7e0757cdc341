use std::sync::Arc;

use time::OffsetDateTime;

/// 注入可能な時計
///
/// 有効期限・ロックアウト判定はすべてこの時計経由で現在時刻を取得する。
/// テストでは `Clock::fixed` で決定的に検証できる。
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> OffsetDateTime + Send + Sync>);

impl Clock {
    /// システム時計
    pub fn system() -> Self {
        Self(Arc::new(OffsetDateTime::now_utc))
    }

    /// 固定時刻（テスト用）
    pub fn fixed(at: OffsetDateTime) -> Self {
        Self(Arc::new(move || at))
    }

    pub fn now(&self) -> OffsetDateTime {
        (self.0)()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_returns_same_instant() {
        let at = OffsetDateTime::UNIX_EPOCH;
        let clock = Clock::fixed(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), clock.now());
    }
}
