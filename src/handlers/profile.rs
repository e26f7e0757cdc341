use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SecurityNotificationsRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct SecurityNotificationsResponse {
    pub message: String,
    pub security_notifications: bool,
}

/// PATCH /api/users/me/security-notifications
///
/// 2FA有効化・無効化などのセキュリティ通知メールの受信設定を切り替える。
pub async fn update_security_notifications(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(request): Json<SecurityNotificationsRequest>,
) -> Result<Json<SecurityNotificationsResponse>, AppError> {
    state
        .user_repo
        .update_security_notifications(claims.sub, request.enabled)
        .await?;

    tracing::info!(user_id = %claims.sub, enabled = request.enabled, "セキュリティ通知設定を変更");

    Ok(Json(SecurityNotificationsResponse {
        message: "セキュリティ通知設定を更新しました".to_string(),
        security_notifications: request.enabled,
    }))
}
