use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: {0}")]
    Authentication(String),

    #[error("認証失敗（残り{remaining_attempts}回）")]
    InvalidCredentials { remaining_attempts: i32 },

    #[error("アカウントロック中（残り{remaining_minutes}分）")]
    AccountLocked { remaining_minutes: i64 },

    #[error("権限エラー")]
    Forbidden,

    #[error("パスワードの変更が必要です")]
    PasswordChangeRequired,

    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("パスワードポリシー違反: {0}")]
    WeakPassword(String),

    #[error("新しいパスワードが現在のパスワードと同一です")]
    SamePassword,

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    #[error("このメールアドレスは既に使用されています")]
    EmailAlreadyExists,

    #[error("トークンが見つかりません")]
    TokenNotFound,

    #[error("無効または期限切れのトークンです")]
    TokenExpired,

    #[error("使用済みのトークンです")]
    TokenAlreadyUsed,

    #[error("認証コードが無効です")]
    TotpInvalid,

    #[error("二要素認証は既に有効です")]
    TotpAlreadyEnabled,

    #[error("二要素認証が有効化されていません")]
    TotpNotEnabled,

    #[error("二要素認証の設定が開始されていません")]
    TotpSetupRequired,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_attempts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_minutes: Option<i64>,
}

impl ErrorResponse {
    fn new(message: String) -> Self {
        Self {
            error: message,
            remaining_attempts: None,
            remaining_minutes: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("メールアドレスまたはパスワードが正しくありません".to_string()),
            ),
            Self::InvalidCredentials { remaining_attempts } => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: format!(
                        "メールアドレスまたはパスワードが正しくありません（残り{}回で一時ロック）",
                        remaining_attempts
                    ),
                    remaining_attempts: Some(*remaining_attempts),
                    remaining_minutes: None,
                },
            ),
            Self::AccountLocked { remaining_minutes } => (
                StatusCode::LOCKED,
                ErrorResponse {
                    error: format!(
                        "ログイン失敗が続いたためアカウントをロックしました。約{}分後に再試行してください",
                        remaining_minutes
                    ),
                    remaining_attempts: None,
                    remaining_minutes: Some(*remaining_minutes),
                },
            ),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("この操作を行う権限がありません".to_string()),
            ),
            Self::PasswordChangeRequired => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("初回ログインのためパスワードの変更が必要です".to_string()),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone())),
            Self::WeakPassword(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone())),
            Self::SamePassword => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(
                    "新しいパスワードは現在のパスワードと異なるものを指定してください".to_string(),
                ),
            ),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("内部エラーが発生しました".to_string()),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("内部エラーが発生しました".to_string()),
                )
            }
            Self::EmailAlreadyExists => (
                StatusCode::CONFLICT,
                ErrorResponse::new("このメールアドレスは既に使用されています".to_string()),
            ),
            Self::TokenNotFound => (
                StatusCode::BAD_REQUEST,
                // 存在有無の漏洩防止
                ErrorResponse::new("無効なリクエストです".to_string()),
            ),
            Self::TokenExpired => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("無効または期限切れのリンクです".to_string()),
            ),
            Self::TokenAlreadyUsed => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("このトークンは既に使用されています".to_string()),
            ),
            Self::TotpInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("認証コードが正しくありません".to_string()),
            ),
            Self::TotpAlreadyEnabled => (
                StatusCode::CONFLICT,
                ErrorResponse::new("二要素認証は既に有効です".to_string()),
            ),
            Self::TotpNotEnabled => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("二要素認証が有効化されていません".to_string()),
            ),
            Self::TotpSetupRequired => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("先に二要素認証の設定を開始してください".to_string()),
            ),
        };

        (status, Json(body)).into_response()
    }
}
