use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// パスワードリセットトークン
///
/// トークン自体はSHA256ハッシュ化してDBに保存（token_hash）
/// 平文トークンはユーザーにメールで送信し、DBには保存しない
#[derive(Debug, FromRow, Serialize)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip)]
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub is_used: bool,
    pub used_at: Option<OffsetDateTime>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

impl PasswordResetToken {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// 未使用かつ期限内か
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        !self.is_used && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn token_at(expires_at: OffsetDateTime) -> PasswordResetToken {
        PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "x".repeat(64),
            expires_at,
            is_used: false,
            used_at: None,
            ip_address: None,
            user_agent: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_valid_before_expiry() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let token = token_at(now + Duration::minutes(5));
        assert!(token.is_valid(now));
    }

    #[test]
    fn test_expired_after_expiry() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let token = token_at(now - Duration::seconds(1));
        assert!(token.is_expired(now));
        assert!(!token.is_valid(now));
    }

    #[test]
    fn test_used_token_is_invalid_even_if_unexpired() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut token = token_at(now + Duration::minutes(5));
        token.is_used = true;
        token.used_at = Some(now);
        assert!(!token.is_valid(now));
    }
}
