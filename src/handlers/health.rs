use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// ヘルスチェックハンドラー
///
/// GET /api/health
///
/// DB疎通を含む稼働状況を返す。DB不通でも200で返し、
/// `status: degraded` で報告する（本体プロセスは生きているため）。
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();

    if !db_ok {
        tracing::warn!("ヘルスチェック: データベース疎通に失敗");
    }

    Json(build_health_response(db_ok))
}

fn build_health_response(db_ok: bool) -> HealthResponse {
    HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        service: "aquagate",
        version: env!("CARGO_PKG_VERSION"),
        database: if db_ok { "ok" } else { "unavailable" },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_response() {
        let response = build_health_response(true);
        assert_eq!(response.status, "ok");
        assert_eq!(response.database, "ok");
        assert_eq!(response.service, "aquagate");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_degraded_when_database_unreachable() {
        let response = build_health_response(false);
        assert_eq!(response.status, "degraded");
        assert_eq!(response.database, "unavailable");
    }
}
