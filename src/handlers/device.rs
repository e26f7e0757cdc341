use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{TrustedDevice, User};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<TrustedDevice>,
}

/// GET /api/devices
///
/// 信頼済みデバイスの一覧（フィンガープリントは登録時の値をそのまま返す）。
pub async fn list_devices(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<DeviceListResponse>, AppError> {
    let user = find_user(&state, claims.sub).await?;
    Ok(Json(DeviceListResponse {
        devices: user.trusted_devices().to_vec(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddDeviceRequest {
    pub fingerprint: String,
    pub name: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddDeviceResponse {
    pub message: String,
    pub device: TrustedDevice,
}

/// POST /api/devices
///
/// 現在のデバイスを信頼済みとして登録する。上限（5件）超過時は最古を退避。
pub async fn add_device(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Json(request): Json<AddDeviceRequest>,
) -> Result<Json<AddDeviceResponse>, AppError> {
    if request.fingerprint.trim().is_empty() {
        return Err(AppError::Validation(
            "デバイスフィンガープリントは必須です".to_string(),
        ));
    }

    let user = find_user(&state, claims.sub).await?;
    let device = state
        .trusted_device_service
        .add(
            &user,
            request.fingerprint.trim(),
            request.name.as_deref(),
            request.user_agent.as_deref(),
        )
        .await?;

    Ok(Json(AddDeviceResponse {
        message: "デバイスを信頼済みとして登録しました".to_string(),
        device,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// DELETE /api/devices/{fingerprint}
pub async fn remove_device(
    State(state): State<AppState>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Path(fingerprint): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = find_user(&state, claims.sub).await?;
    state
        .trusted_device_service
        .remove(&user, &fingerprint)
        .await?;

    Ok(Json(MessageResponse {
        message: "デバイスの信頼を解除しました".to_string(),
    }))
}

async fn find_user(state: &AppState, user_id: uuid::Uuid) -> Result<User, AppError> {
    state
        .user_repo
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))
}
