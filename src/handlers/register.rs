use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::UserRole;
use crate::repositories::NewUser;
use crate::services::auth::hash_password;
use crate::state::AppState;

/// 新規登録ユーザーの初期パスワード
///
/// 初回ログイン時にパスワード変更が強制される（is_first_login）。
const INITIAL_PASSWORD: &str = "12345678";

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub role: UserRole,
    pub gender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_first_login: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// ユーザー登録ハンドラー
///
/// POST /api/users/signup （admin のみ）
///
/// 初期パスワードは固定値で発行し、初回ログイン時に変更を強制する。
///
/// # Security
/// - パスワードはログに出力しない
/// - パスワードは即座にハッシュ化
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    // バリデーション
    validate_register_request(&request)?;

    // 初期パスワードハッシュ化
    let password_hash = hash_password(INITIAL_PASSWORD)?;

    // ユーザー作成
    let user = state
        .user_repo
        .create_user(NewUser {
            fname: request.fname.trim(),
            lname: request.lname.trim(),
            email: request.email.trim(),
            phone: request.phone.as_deref(),
            location: request.location.as_deref(),
            role: request.role,
            gender: request.gender.as_deref(),
            password_hash: &password_hash,
        })
        .await
        .map_err(|e| {
            // UNIQUE制約違反チェック
            if let sqlx::Error::Database(db_err) = &e
                && db_err.constraint() == Some("users_email_key")
            {
                return AppError::EmailAlreadyExists;
            }
            AppError::Database(e)
        })?;

    tracing::info!(email = %user.email, role = %user.role.as_str(), "ユーザー登録成功");

    Ok(Json(RegisterResponse {
        id: user.id,
        email: user.email,
        role: user.role,
        is_first_login: user.is_first_login,
        created_at: user.created_at,
    }))
}

/// 登録リクエストのバリデーション
fn validate_register_request(request: &RegisterRequest) -> Result<(), AppError> {
    if request.fname.trim().is_empty() || request.lname.trim().is_empty() {
        return Err(AppError::Validation("氏名は必須です".to_string()));
    }
    // email: 必須、メール形式
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }
    if !request.email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RegisterRequest {
        RegisterRequest {
            fname: "Taro".to_string(),
            lname: "Yamada".to_string(),
            email: "taro@example.com".to_string(),
            phone: None,
            location: Some("Tokyo".to_string()),
            role: UserRole::Operator,
            gender: None,
        }
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(validate_register_request(&valid_request()).is_ok());
    }

    #[test]
    fn test_validate_empty_fname() {
        let mut request = valid_request();
        request.fname = "  ".to_string();
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_empty_email() {
        let mut request = valid_request();
        request.email = String::new();
        assert!(validate_register_request(&request).is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        let mut request = valid_request();
        request.email = "not-an-email".to_string();
        assert!(validate_register_request(&request).is_err());
    }
}
