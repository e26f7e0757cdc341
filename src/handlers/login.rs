use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// ユーザーのメールアドレス
    pub email: String,
    /// ユーザーのパスワード
    pub password: String,
    /// デバイスフィンガープリント（信頼済みデバイスによる2FA免除判定に使用）
    pub device_fingerprint: Option<String>,
}

/// ログインレスポンス
///
/// 2FA有効かつ未信頼デバイスの場合は `requires_2fa: true` と `user_id` のみ返し、
/// セッショントークンは第二要素の検証後に発行される。
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// リダイレクト先URL（初回ログイン時はパスワード変更画面）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<&'static str>,
    /// 2FAが必要かどうか
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_2fa: Option<bool>,
    /// ユーザーID（2FA必要時に返却）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

/// ログインハンドラー
///
/// POST /api/users/login
///
/// 処理フロー:
/// 1. リクエストバリデーション
/// 2. ユーザー認証（ロック確認 → パスワード照合 → 試行記録）
/// 3. 2FA有効チェック（信頼済みデバイスなら免除、それ以外は requires_2fa を返却）
/// 4. セッショントークン発行
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // 1. リクエストバリデーション
    validate_login_request(&request)?;

    // 2. ユーザー認証
    let user = state
        .auth_service
        .authenticate(&request.email, &request.password)
        .await?;

    // 3. 2FA有効チェック
    if user.two_factor_enabled {
        let trusted = match &request.device_fingerprint {
            Some(fp) => state.trusted_device_service.is_trusted(&user, fp).await?,
            None => false,
        };

        if !trusted {
            // 第二要素の検証が必要、トークンは発行しない
            return Ok(Json(LoginResponse {
                token: None,
                user: None,
                redirect_to: Some("/two-factor-verify"),
                requires_2fa: Some(true),
                user_id: Some(user.id),
            }));
        }

        tracing::info!(user_id = %user.id, "信頼済みデバイスにより2FAを免除");
    }

    // 4. セッショントークン発行
    issue_session(&state, user)
}

/// 第二要素検証リクエスト
#[derive(Debug, Deserialize)]
pub struct VerifySecondFactorRequest {
    pub user_id: Uuid,
    /// TOTPコード（6桁）またはバックアップコード（8桁HEX）
    pub code: String,
    #[serde(default)]
    pub is_backup_code: bool,
    /// このデバイスを信頼済みとして記憶するか
    #[serde(default)]
    pub remember_device: bool,
    pub device_fingerprint: Option<String>,
    pub device_name: Option<String>,
    pub user_agent: Option<String>,
}

/// 第二要素検証ハンドラー
///
/// POST /api/users/login/verify-2fa
///
/// パスワード認証済みユーザーの TOTP / バックアップコードを検証し、
/// 成功時にセッショントークンを発行する。`remember_device` 指定時は
/// デバイスを信頼済みリストに登録する（以後の2FAチャレンジを免除）。
///
/// ここでの検証失敗はパスワードのロックアウトカウンタに影響しない。
pub async fn verify_second_factor(
    State(state): State<AppState>,
    Json(request): Json<VerifySecondFactorRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if request.code.trim().is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }

    let user = state
        .two_factor_service
        .verify_login(request.user_id, request.code.trim(), request.is_backup_code)
        .await?;

    if request.remember_device
        && let Some(fp) = &request.device_fingerprint
    {
        state
            .trusted_device_service
            .add(
                &user,
                fp,
                request.device_name.as_deref(),
                request.user_agent.as_deref(),
            )
            .await?;
    }

    issue_session(&state, user)
}

/// 認証完了後のセッション発行とレスポンス構築
fn issue_session(state: &AppState, user: User) -> Result<Json<LoginResponse>, AppError> {
    let token = state.session_service.issue(&user)?;

    // 初回ログインはパスワード変更画面へ誘導
    let redirect_to = user.is_first_login.then_some("/change-password");

    Ok(Json(LoginResponse {
        token: Some(token),
        user: Some(user),
        redirect_to,
        requires_2fa: None,
        user_id: None,
    }))
}

/// ログインリクエストのバリデーション
fn validate_login_request(request: &LoginRequest) -> Result<(), AppError> {
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }
    if request.password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_email() {
        let request = LoginRequest {
            email: String::new(),
            password: "password123".to_string(),
            device_fingerprint: None,
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_empty_password() {
        let request = LoginRequest {
            email: "taro@example.com".to_string(),
            password: String::new(),
            device_fingerprint: None,
        };
        assert!(validate_login_request(&request).is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        let request = LoginRequest {
            email: "taro@example.com".to_string(),
            password: "password123".to_string(),
            device_fingerprint: Some("fp-1".to_string()),
        };
        assert!(validate_login_request(&request).is_ok());
    }
}
