use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::auth::PASSWORD_SYMBOLS;
use crate::services::password_reset::ResetTokenInfo;
use crate::services::token::RequestMeta;
use crate::state::AppState;

// === リセット依頼 ===

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/password/forgot
///
/// # Security
/// 常に200を返す（ユーザー存在有無を漏洩しない）
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    // バリデーション
    validate_email(&request.email)?;

    let meta = request_meta(&headers, request.device_fingerprint);
    state
        .password_reset_service
        .request_reset(&request.email, &meta)
        .await?;

    Ok(Json(MessageResponse {
        message: "パスワードリセット手順をメールで送信しました".to_string(),
    }))
}

// === リセットトークン事前検証 ===

/// GET /api/password/reset/{token}
///
/// リセットフォーム表示前のトークン有効性チェック。トークンは消費しない。
pub async fn verify_reset_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResetTokenInfo>, AppError> {
    let info = state.password_reset_service.verify_token(&token).await?;
    Ok(Json(info))
}

// === パスワードリセット実行 ===

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /api/password/reset
///
/// # Security
/// - token, new_password はログに出力しない
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if request.token.trim().is_empty() {
        return Err(AppError::Validation("トークンは必須です".to_string()));
    }

    state
        .password_reset_service
        .reset_password(
            &request.token,
            &request.new_password,
            &request.confirm_password,
        )
        .await?;

    Ok(Json(MessageResponse {
        message: "パスワードが更新されました".to_string(),
    }))
}

// === パスワード変更（認証済み） ===

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /api/password/change
///
/// 現在のパスワードでの再認証が必須。初回ログイン中（強制変更）でも利用できる。
/// 更新後は再度ログインしてトークンを取り直す。
pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if request.new_password != request.confirm_password {
        return Err(AppError::Validation(
            "パスワードが一致しません".to_string(),
        ));
    }

    let user = state
        .user_repo
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    // 再認証（失敗カウンタは動かさない）
    if !state
        .auth_service
        .verify_password(&user, &request.current_password)?
    {
        return Err(AppError::Authentication("invalid_password".to_string()));
    }

    state
        .auth_service
        .set_password(&user, &request.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "パスワードが更新されました。再度ログインしてください".to_string(),
    }))
}

// === パスワード要件 ===

#[derive(Debug, Serialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub requires_lowercase: bool,
    pub requires_uppercase: bool,
    pub requires_digit: bool,
    pub requires_symbol: bool,
    pub allowed_symbols: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PasswordRequirementsResponse {
    /// 変更が必要か（初回ログイン＝デフォルトパスワードのまま）
    pub requires_password_change: bool,
    pub is_first_login: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub password_last_changed: Option<time::OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<time::OffsetDateTime>,
    /// フロントエンドのバリデーション表示用ポリシー
    pub policy: PasswordPolicy,
}

/// GET /api/password/requirements
///
/// 自アカウントのパスワード状態レポート（変更要否・最終変更・最終ログイン）。
pub async fn password_requirements(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<PasswordRequirementsResponse>, AppError> {
    let user = state
        .user_repo
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    Ok(Json(requirements_for(&user)))
}

/// ユーザー行からレポートを構築
fn requirements_for(user: &crate::models::User) -> PasswordRequirementsResponse {
    PasswordRequirementsResponse {
        requires_password_change: user.is_first_login,
        is_first_login: user.is_first_login,
        password_last_changed: user.password_changed_at,
        last_login: user.last_login_at,
        policy: PasswordPolicy {
            min_length: 8,
            max_length: 128,
            requires_lowercase: true,
            requires_uppercase: true,
            requires_digit: true,
            requires_symbol: true,
            allowed_symbols: PASSWORD_SYMBOLS,
        },
    }
}

/// メールアドレスのバリデーション
fn validate_email(email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }
    Ok(())
}

/// リクエストヘッダから監査用メタデータを構築
fn request_meta(headers: &HeaderMap, device_fingerprint: Option<String>) -> RequestMeta {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    RequestMeta {
        ip_address,
        user_agent,
        device_fingerprint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("taro@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
    }

    #[test]
    fn test_request_meta_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("user-agent", HeaderValue::from_static("TestAgent/1.0"));

        let meta = request_meta(&headers, None);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("TestAgent/1.0"));
    }

    #[test]
    fn test_request_meta_missing_headers() {
        let meta = request_meta(&HeaderMap::new(), Some("fp-1".to_string()));
        assert!(meta.ip_address.is_none());
        assert!(meta.user_agent.is_none());
        assert_eq!(meta.device_fingerprint.as_deref(), Some("fp-1"));
    }

    fn requirements_user(is_first_login: bool) -> crate::models::User {
        use crate::models::UserRole;
        use time::OffsetDateTime;
        use uuid::Uuid;

        let now = OffsetDateTime::UNIX_EPOCH;
        crate::models::User {
            id: Uuid::new_v4(),
            fname: "Taro".to_string(),
            lname: "Yamada".to_string(),
            email: "taro@example.com".to_string(),
            phone: None,
            location: None,
            role: UserRole::Operator,
            gender: None,
            password_hash: String::new(),
            is_first_login,
            password_changed_at: (!is_first_login).then_some(now),
            last_login_at: Some(now),
            login_attempts: 0,
            locked_until: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_codes: None,
            trusted_devices: None,
            security_notifications: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_requirements_first_login_requires_change() {
        let report = requirements_for(&requirements_user(true));
        assert!(report.requires_password_change);
        assert!(report.is_first_login);
        assert!(report.password_last_changed.is_none());
        assert!(report.last_login.is_some());
    }

    #[test]
    fn test_requirements_after_password_change() {
        let report = requirements_for(&requirements_user(false));
        assert!(!report.requires_password_change);
        assert!(report.password_last_changed.is_some());
    }

    #[test]
    fn test_requirements_carries_policy() {
        let report = requirements_for(&requirements_user(false));
        assert_eq!(report.policy.min_length, 8);
        assert_eq!(report.policy.max_length, 128);
        assert_eq!(report.policy.allowed_symbols, PASSWORD_SYMBOLS);
    }
}
