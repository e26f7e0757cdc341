use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::two_factor::{SetupData, TwoFactorStatus};
use crate::state::AppState;

/// POST /api/two-factor/setup
///
/// シークレットを生成し、QRコードと手入力用キーを返す。
/// この時点ではまだ有効化されない（enable で初回コード検証が必要）。
///
/// # Security
/// - シークレットはレスポンスのみに含め、ログには出力しない
pub async fn setup_2fa(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<SetupData>, AppError> {
    let data = state.two_factor_service.setup(claims.sub).await?;
    Ok(Json(data))
}

#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    /// 認証アプリが表示する6桁コード
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct EnableResponse {
    pub message: String,
    /// バックアップコード平文（この応答が唯一の提示機会）
    pub backup_codes: Vec<String>,
}

/// POST /api/two-factor/enable
///
/// 初回コードの検証に成功すると2FAが有効化され、バックアップコードが発行される。
pub async fn enable_2fa(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(request): Json<EnableRequest>,
) -> Result<Json<EnableResponse>, AppError> {
    if request.code.trim().is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }

    let backup_codes = state
        .two_factor_service
        .enable(claims.sub, request.code.trim())
        .await?;

    Ok(Json(EnableResponse {
        message: "二要素認証を有効化しました。バックアップコードを安全な場所に保管してください"
            .to_string(),
        backup_codes,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    /// 再認証用パスワード（code の代わりに指定可）
    pub password: Option<String>,
    /// 再認証用の現行TOTPコード
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/two-factor/disable
///
/// パスワードまたは現行TOTPコードでの再認証が必須。
pub async fn disable_2fa(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .two_factor_service
        .disable(
            claims.sub,
            request.password.as_deref(),
            request.code.as_deref().map(str::trim),
        )
        .await?;

    Ok(Json(MessageResponse {
        message: "二要素認証を無効化しました".to_string(),
    }))
}

/// GET /api/two-factor/status
pub async fn two_factor_status(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<TwoFactorStatus>, AppError> {
    let status = state.two_factor_service.status(claims.sub).await?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct RegenerateBackupCodesResponse {
    pub message: String,
    pub backup_codes: Vec<String>,
}

/// POST /api/two-factor/backup-codes
///
/// 旧バックアップコードはすべて無効になる。
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<RegenerateBackupCodesResponse>, AppError> {
    let backup_codes = state
        .two_factor_service
        .regenerate_backup_codes(claims.sub)
        .await?;

    Ok(Json(RegenerateBackupCodesResponse {
        message: "バックアップコードを再生成しました。旧コードは使用できません".to_string(),
        backup_codes,
    }))
}
