use time::OffsetDateTime;

use crate::error::AppError;
use crate::models::{TrustedDevice, User};
use crate::repositories::UserRepository;
use crate::services::clock::Clock;

/// 1ユーザーが保持できる信頼済みデバイスの上限
pub const MAX_TRUSTED_DEVICES: usize = 5;

/// 信頼済みデバイス管理サービス
///
/// 信頼済みデバイスは2FAチャレンジの免除シグナルにすぎない。
/// パスワード検証の代替には決してならない。
#[derive(Clone)]
pub struct TrustedDeviceService {
    user_repo: UserRepository,
    clock: Clock,
}

impl TrustedDeviceService {
    pub fn new(user_repo: UserRepository, clock: Clock) -> Self {
        Self { user_repo, clock }
    }

    /// デバイスが信頼済みか確認し、信頼済みなら last_used_at を更新
    pub async fn is_trusted(&self, user: &User, fingerprint: &str) -> Result<bool, AppError> {
        let devices = user.trusted_devices();
        if !devices.iter().any(|d| d.fingerprint == fingerprint) {
            return Ok(false);
        }

        let touched = touch_device(devices, fingerprint, self.clock.now());
        self.user_repo
            .update_trusted_devices(user.id, &touched)
            .await?;

        Ok(true)
    }

    /// デバイスを信頼済みリストに追加（上限超過時は最古を退避）
    pub async fn add(
        &self,
        user: &User,
        fingerprint: &str,
        name: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<TrustedDevice, AppError> {
        let now = self.clock.now();
        let device = TrustedDevice {
            fingerprint: fingerprint.to_string(),
            name: name.unwrap_or("Unknown Device").to_string(),
            user_agent: user_agent.map(str::to_string),
            added_at: now,
            last_used_at: now,
        };

        let updated = register_device(user.trusted_devices(), device.clone());
        self.user_repo
            .update_trusted_devices(user.id, &updated)
            .await?;

        tracing::info!(user_id = %user.id, "信頼済みデバイス追加");

        Ok(device)
    }

    /// デバイスを信頼済みリストから削除
    pub async fn remove(&self, user: &User, fingerprint: &str) -> Result<(), AppError> {
        let remaining: Vec<TrustedDevice> = user
            .trusted_devices()
            .iter()
            .filter(|d| d.fingerprint != fingerprint)
            .cloned()
            .collect();

        self.user_repo
            .update_trusted_devices(user.id, &remaining)
            .await?;

        tracing::info!(user_id = %user.id, "信頼済みデバイス削除");

        Ok(())
    }
}

/// デバイスを追加した新リストを返す（純粋関数）
///
/// 既知のfingerprintは上書き。上限超過時は added_at が最古のものを退避。
fn register_device(devices: &[TrustedDevice], device: TrustedDevice) -> Vec<TrustedDevice> {
    let mut updated: Vec<TrustedDevice> = devices
        .iter()
        .filter(|d| d.fingerprint != device.fingerprint)
        .cloned()
        .collect();
    updated.push(device);

    while updated.len() > MAX_TRUSTED_DEVICES {
        let oldest = updated
            .iter()
            .enumerate()
            .min_by_key(|(_, d)| d.added_at)
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                updated.remove(i);
            }
            None => break,
        }
    }

    updated
}

/// 一致するデバイスの last_used_at を更新した新リストを返す（純粋関数）
fn touch_device(
    devices: &[TrustedDevice],
    fingerprint: &str,
    now: OffsetDateTime,
) -> Vec<TrustedDevice> {
    devices
        .iter()
        .map(|d| {
            let mut d = d.clone();
            if d.fingerprint == fingerprint {
                d.last_used_at = now;
            }
            d
        })
        .collect()
}
