use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{User, UserRole};
use crate::services::clock::Clock;

/// セッショントークンのクレーム（フラットな単一スキーマ）
///
/// ネストした user オブジェクトは持たない。認可側はこのクレームを
/// トークン有効期間中そのまま信頼する（リフレッシュ・失効機構なし）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: UserRole,
    pub location: Option<String>,
    pub is_first_login: bool,
    pub two_factor_enabled: bool,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
}

/// セッショントークン発行サービス（HS256、24時間固定）
///
/// 全ゲート（パスワード・ロックアウト・2FA）通過後にのみ発行される。
/// サーバー側セッションストアは持たないステートレス方式。
#[derive(Clone)]
pub struct SessionService {
    config: Arc<Config>,
    clock: Clock,
}

impl SessionService {
    pub fn new(config: Arc<Config>, clock: Clock) -> Self {
        Self { config, clock }
    }

    /// セッショントークンを発行
    pub fn issue(&self, user: &User) -> Result<String, AppError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            location: user.location.clone(),
            is_first_login: user.is_first_login,
            two_factor_enabled: user.two_factor_enabled,
            iat: now.unix_timestamp() as usize,
            exp: (now.unix_timestamp() + self.config.session_ttl_secs) as usize,
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.session_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            tracing::error!(error = ?e, "セッショントークン署名エラー");
            AppError::Internal(anyhow::anyhow!("session token signing error"))
        })
    }

    /// セッショントークンを検証し、クレームを取り出す
    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.session_secret.expose_secret().as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| AppError::Authentication("invalid session token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretBox;
    use time::OffsetDateTime;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: SecretBox::new(Box::new("postgres://localhost/test".to_string())),
            host: "127.0.0.1".to_string(),
            port: 3000,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from_address: None,
            password_reset_url_base: None,
            password_reset_token_ttl_secs: 300,
            totp_issuer: "TestPool".to_string(),
            encryption_key: SecretBox::new(Box::new(String::new())),
            session_secret: SecretBox::new(Box::new("test-session-secret".to_string())),
            session_ttl_secs: 24 * 60 * 60,
        })
    }

    fn test_user() -> User {
        let now = OffsetDateTime::UNIX_EPOCH;
        User {
            id: Uuid::new_v4(),
            fname: "Hanako".to_string(),
            lname: "Suzuki".to_string(),
            email: "hanako@example.com".to_string(),
            phone: None,
            location: Some("Musanze".to_string()),
            role: UserRole::Overseer,
            gender: None,
            password_hash: String::new(),
            is_first_login: false,
            password_changed_at: None,
            last_login_at: None,
            login_attempts: 0,
            locked_until: None,
            two_factor_enabled: true,
            two_factor_secret: None,
            backup_codes: None,
            trusted_devices: None,
            security_notifications: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_issue_validate_round_trip() {
        let service = SessionService::new(test_config(), Clock::system());
        let user = test_user();

        let token = service.issue(&user).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, UserRole::Overseer);
        assert_eq!(claims.location.as_deref(), Some("Musanze"));
        assert!(claims.two_factor_enabled);
        assert!(!claims.is_first_login);
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let service = SessionService::new(test_config(), Clock::system());
        let user = test_user();

        let mut token = service.issue(&user).unwrap();
        token.push('x');
        assert!(service.validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // 発行時刻を25時間前に固定すると exp が過去になる
        let past = OffsetDateTime::now_utc() - time::Duration::hours(25);
        let service = SessionService::new(test_config(), Clock::fixed(past));
        let user = test_user();

        let token = service.issue(&user).unwrap();
        assert!(service.validate(&token).is_err());
    }
}
