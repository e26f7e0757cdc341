use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

/// ユーザーロール
///
/// admin: 全権限 / operator: プール運用担当 / overseer: 監督者 / guest: ゲスト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Operator,
    Overseer,
    Guest,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Overseer => "overseer",
            Self::Guest => "guest",
        }
    }
}

/// 信頼済みデバイス（2FAチャレンジを免除するデバイス）
///
/// users.trusted_devices (JSONB) に最大5件保存。超過時は added_at が最古のものを退避。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub fingerprint: String,
    pub name: String,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,
}

#[derive(Debug, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub role: UserRole,
    pub gender: Option<String>,
    #[serde(skip)]
    pub password_hash: String,

    // セキュリティ関連フィールド
    pub is_first_login: bool,
    pub password_changed_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(skip)]
    pub login_attempts: i32,
    #[serde(skip)]
    pub locked_until: Option<OffsetDateTime>,
    pub two_factor_enabled: bool,
    /// AES-256-GCM で暗号化された TOTP シークレット（設定中または有効時のみ非NULL）
    #[serde(skip)]
    pub two_factor_secret: Option<Vec<u8>>,
    /// SHA256ハッシュ済みバックアップコード
    #[serde(skip)]
    pub backup_codes: Option<Json<Vec<String>>>,
    #[serde(skip)]
    pub trusted_devices: Option<Json<Vec<TrustedDevice>>>,
    pub security_notifications: bool,

    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// アカウントがロック中か
    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        matches!(self.locked_until, Some(until) if now < until)
    }

    /// ロック解除までの残り分数（切り上げ）
    pub fn remaining_lock_minutes(&self, now: OffsetDateTime) -> i64 {
        match self.locked_until {
            Some(until) if now < until => {
                let secs = (until - now).whole_seconds();
                (secs + 59) / 60
            }
            _ => 0,
        }
    }

    pub fn trusted_devices(&self) -> &[TrustedDevice] {
        self.trusted_devices.as_ref().map_or(&[], |d| &d.0)
    }

    pub fn backup_codes(&self) -> &[String] {
        self.backup_codes.as_ref().map_or(&[], |c| &c.0)
    }

    /// 2FAセットアップが開始済みか（シークレット保存済み、有効化前を含む）
    pub fn has_two_factor_secret(&self) -> bool {
        self.two_factor_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn base_user() -> User {
        let now = OffsetDateTime::UNIX_EPOCH;
        User {
            id: Uuid::new_v4(),
            fname: "Taro".to_string(),
            lname: "Yamada".to_string(),
            email: "taro@example.com".to_string(),
            phone: None,
            location: Some("Kigali".to_string()),
            role: UserRole::Operator,
            gender: None,
            password_hash: String::new(),
            is_first_login: true,
            password_changed_at: None,
            last_login_at: None,
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
    fn test_not_locked_without_locked_until() {
        let user = base_user();
        let now = OffsetDateTime::UNIX_EPOCH;
        assert!(!user.is_locked(now));
        assert_eq!(user.remaining_lock_minutes(now), 0);
    }

    #[test]
    fn test_locked_until_future() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut user = base_user();
        user.locked_until = Some(now + Duration::minutes(30));

        assert!(user.is_locked(now));
        assert_eq!(user.remaining_lock_minutes(now), 30);
    }

    #[test]
    fn test_lock_expired_in_past() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut user = base_user();
        user.locked_until = Some(now - Duration::seconds(1));

        assert!(!user.is_locked(now));
        assert_eq!(user.remaining_lock_minutes(now), 0);
    }

    #[test]
    fn test_remaining_minutes_rounds_up() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut user = base_user();
        user.locked_until = Some(now + Duration::seconds(61));

        // 61秒 → 2分と報告
        assert_eq!(user.remaining_lock_minutes(now), 2);
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::Guest.as_str(), "guest");
    }
}
