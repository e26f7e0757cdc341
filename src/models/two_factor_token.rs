use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// 2FAトークン種別
///
/// setup: 2FA設定用 / verification: ログイン時検証用 / backup: 一時バックアップ用
/// ユーザーごと・種別ごとに有効なトークンは常に1件のみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "two_factor_token_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Setup,
    Verification,
    Backup,
}

impl TokenKind {
    /// 種別ごとの有効期間
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Setup => Duration::minutes(10),
            Self::Verification => Duration::minutes(5),
            Self::Backup => Duration::hours(24),
        }
    }

    /// 平文トークンの形式チェック（DB照会前に弾く）
    ///
    /// setup / verification: 6桁数字、backup: 8桁大文字HEX
    pub fn is_valid_format(&self, value: &str) -> bool {
        match self {
            Self::Setup | Self::Verification => {
                value.len() == 6 && value.chars().all(|c| c.is_ascii_digit())
            }
            Self::Backup => {
                value.len() == 8
                    && value
                        .chars()
                        .all(|c| c.is_ascii_uppercase() && c.is_ascii_hexdigit() || c.is_ascii_digit())
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Verification => "verification",
            Self::Backup => "backup",
        }
    }
}

/// 2FAトークン（設定・検証・一時バックアップ）
///
/// アカウントの permanent バックアップコード（users.backup_codes）とは別物。
#[derive(Debug, FromRow, Serialize)]
pub struct TwoFactorToken {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip)]
    pub token_hash: String,
    pub token_kind: TokenKind,
    pub expires_at: OffsetDateTime,
    pub is_used: bool,
    pub used_at: Option<OffsetDateTime>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: OffsetDateTime,
}

impl TwoFactorToken {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        !self.is_used && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_per_kind() {
        assert_eq!(TokenKind::Setup.ttl(), Duration::minutes(10));
        assert_eq!(TokenKind::Verification.ttl(), Duration::minutes(5));
        assert_eq!(TokenKind::Backup.ttl(), Duration::hours(24));
    }

    #[test]
    fn test_numeric_token_format() {
        assert!(TokenKind::Verification.is_valid_format("123456"));
        assert!(TokenKind::Setup.is_valid_format("000000"));
        assert!(!TokenKind::Verification.is_valid_format("12345"));
        assert!(!TokenKind::Verification.is_valid_format("1234567"));
        assert!(!TokenKind::Verification.is_valid_format("12345a"));
    }

    #[test]
    fn test_backup_token_format() {
        assert!(TokenKind::Backup.is_valid_format("A1B2C3D4"));
        assert!(TokenKind::Backup.is_valid_format("00FFAA99"));
        // 小文字は不可
        assert!(!TokenKind::Backup.is_valid_format("a1b2c3d4"));
        assert!(!TokenKind::Backup.is_valid_format("A1B2C3D"));
        assert!(!TokenKind::Backup.is_valid_format("G1B2C3D4"));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let token = TwoFactorToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: String::new(),
            token_kind: TokenKind::Verification,
            expires_at: now,
            is_used: false,
            used_at: None,
            ip_address: None,
            user_agent: None,
            device_fingerprint: None,
            created_at: now,
        };
        // ちょうど expires_at は有効
        assert!(token.is_valid(now));
        assert!(!token.is_valid(now + Duration::seconds(1)));
    }
}
