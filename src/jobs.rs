use std::time::Duration;

use crate::state::AppState;

/// 期限切れトークン掃除の実行間隔
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// 期限切れトークンの定期削除ジョブを起動
///
/// リセットトークンと2FAトークンは期限切れ後もDBに残るため、
/// 1時間ごとにまとめて削除する。失敗してもジョブは止めない（ログのみ）。
pub fn spawn_cleanup_job(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        // 起動直後の1回目はスキップ
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match state.token_service.cleanup_expired().await {
                Ok((reset_count, two_factor_count)) => {
                    if reset_count > 0 || two_factor_count > 0 {
                        tracing::info!(
                            reset_tokens = reset_count,
                            two_factor_tokens = two_factor_count,
                            "期限切れトークンを削除"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "期限切れトークンの削除に失敗");
                }
            }
        }
    });
}
