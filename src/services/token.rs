use std::sync::Arc;

use data_encoding::{HEXLOWER, HEXUPPER};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{PasswordResetToken, TokenKind, TwoFactorToken};
use crate::repositories::{PasswordResetTokenRepository, TwoFactorTokenRepository};
use crate::services::clock::Clock;

/// リクエスト由来のメタ情報（監査用にトークン行へ保存）
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// 発行結果（平文はこの戻り値以外に存在しない）
#[derive(Debug)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: OffsetDateTime,
}

/// トークン金庫
///
/// 使い捨て・期限付きトークン（パスワードリセット / 2FA各種）の
/// 発行・検証・消費を担う。保存するのはSHA256ハッシュのみ。
///
/// # Security
/// - 平文トークンはログに出力しない
/// - 発行時は「既存の有効トークンを無効化してから作成」を1トランザクションで行う
#[derive(Clone)]
pub struct TokenService {
    reset_repo: PasswordResetTokenRepository,
    two_factor_repo: TwoFactorTokenRepository,
    config: Arc<Config>,
    clock: Clock,
}

impl TokenService {
    pub fn new(
        reset_repo: PasswordResetTokenRepository,
        two_factor_repo: TwoFactorTokenRepository,
        config: Arc<Config>,
        clock: Clock,
    ) -> Self {
        Self {
            reset_repo,
            two_factor_repo,
            config,
            clock,
        }
    }

    // === パスワードリセットトークン ===

    /// リセットトークンを発行（既存の有効トークンは無効化される）
    pub async fn issue_reset(
        &self,
        user_id: Uuid,
        meta: &RequestMeta,
    ) -> Result<IssuedToken, AppError> {
        let value = generate_reset_value();
        let expires_at =
            self.clock.now() + Duration::seconds(self.config.password_reset_token_ttl_secs);

        self.reset_repo
            .replace_for_user(
                user_id,
                &hash_token(&value),
                expires_at,
                meta.ip_address.as_deref(),
                meta.user_agent.as_deref(),
            )
            .await?;

        tracing::info!(user_id = %user_id, "パスワードリセットトークン発行");

        Ok(IssuedToken { value, expires_at })
    }

    /// リセットトークンを検証（消費はしない）
    ///
    /// 形式チェック → ハッシュ照合 → 使用済み・期限チェックの順。
    /// 期限切れでも使用済みマークは付けない（消費は `consume_reset` のみ）。
    pub async fn verify_reset(&self, value: &str) -> Result<PasswordResetToken, AppError> {
        if !is_valid_reset_format(value) {
            return Err(AppError::TokenNotFound);
        }

        let token = self
            .reset_repo
            .find_by_hash(&hash_token(value))
            .await?
            .ok_or(AppError::TokenNotFound)?;

        if let Err(e) = classify_token_state(token.is_used, token.is_expired(self.clock.now())) {
            tracing::warn!(token_id = %token.id, error = %e, "無効なリセットトークン");
            return Err(e);
        }

        Ok(token)
    }

    /// リセットトークンを消費（使用済みマーク、冪等）
    pub async fn consume_reset(&self, value: &str) -> Result<(), AppError> {
        self.reset_repo.mark_as_used(&hash_token(value)).await?;
        Ok(())
    }

    // === 2FAトークン ===

    /// 2FAトークンを発行（同種の有効トークンは無効化される）
    pub async fn issue_two_factor(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        meta: &RequestMeta,
    ) -> Result<IssuedToken, AppError> {
        let value = generate_two_factor_value(kind);
        let expires_at = self.clock.now() + kind.ttl();

        self.two_factor_repo
            .replace_for_user(
                user_id,
                &hash_token(&value),
                kind,
                expires_at,
                meta.ip_address.as_deref(),
                meta.user_agent.as_deref(),
                meta.device_fingerprint.as_deref(),
            )
            .await?;

        tracing::info!(user_id = %user_id, kind = kind.as_str(), "2FAトークン発行");

        Ok(IssuedToken { value, expires_at })
    }

    /// 2FAトークンを検証（消費はしない）
    pub async fn verify_two_factor(
        &self,
        user_id: Uuid,
        value: &str,
        kind: TokenKind,
    ) -> Result<TwoFactorToken, AppError> {
        if !kind.is_valid_format(value) {
            return Err(AppError::TokenNotFound);
        }

        let token = self
            .two_factor_repo
            .find_by_hash(user_id, &hash_token(value), kind)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        if let Err(e) = classify_token_state(token.is_used, token.is_expired(self.clock.now())) {
            tracing::warn!(token_id = %token.id, kind = kind.as_str(), error = %e, "無効な2FAトークン");
            return Err(e);
        }

        Ok(token)
    }

    /// 2FAトークンを消費（使用済みマーク、冪等）
    pub async fn consume_two_factor(
        &self,
        user_id: Uuid,
        value: &str,
        kind: TokenKind,
    ) -> Result<(), AppError> {
        self.two_factor_repo
            .mark_as_used(user_id, &hash_token(value), kind)
            .await?;
        Ok(())
    }

    /// ユーザーの未使用2FAトークンをすべて無効化
    pub async fn invalidate_two_factor_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        self.two_factor_repo.invalidate_for_user(user_id).await?;
        Ok(())
    }

    /// 期限切れトークンを両テーブルから削除
    ///
    /// 発行・検証と並行して実行しても安全（期限述語による削除のみ）。
    pub async fn cleanup_expired(&self) -> Result<(u64, u64), AppError> {
        let reset_cleared = self.reset_repo.delete_expired().await?;
        let two_factor_cleared = self.two_factor_repo.delete_expired().await?;
        Ok((reset_cleared, two_factor_cleared))
    }
}

/// 照合済みトークンの状態判定（純粋関数）
///
/// 使用済みの判定は期限より優先（使用済みかつ期限切れは「使用済み」として報告）。
fn classify_token_state(is_used: bool, is_expired: bool) -> Result<(), AppError> {
    if is_used {
        return Err(AppError::TokenAlreadyUsed);
    }
    if is_expired {
        return Err(AppError::TokenExpired);
    }
    Ok(())
}

/// トークン平文をSHA256でハッシュ化（HEX小文字）
pub fn hash_token(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// リセットトークンの形式チェック: 64桁小文字HEX
pub fn is_valid_reset_format(value: &str) -> bool {
    value.len() == 64
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// 32バイトのランダム値 → 64桁小文字HEX
fn generate_reset_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// 種別に応じた2FAトークン値を生成
fn generate_two_factor_value(kind: TokenKind) -> String {
    match kind {
        // 6桁数字（先頭ゼロなし）
        TokenKind::Setup | TokenKind::Verification => {
            format!("{}", rand::thread_rng().gen_range(100_000..1_000_000))
        }
        // 4バイト → 8桁大文字HEX
        TokenKind::Backup => {
            let mut bytes = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut bytes);
            HEXUPPER.encode(&bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_value_format() {
        let value = generate_reset_value();
        assert_eq!(value.len(), 64);
        assert!(is_valid_reset_format(&value));
    }

    #[test]
    fn test_reset_format_rejects_uppercase_and_short() {
        assert!(!is_valid_reset_format(&"A".repeat(64)));
        assert!(!is_valid_reset_format(&"a".repeat(63)));
        assert!(!is_valid_reset_format(&"g".repeat(64)));
    }

    #[test]
    fn test_numeric_value_matches_own_format() {
        for _ in 0..20 {
            let value = generate_two_factor_value(TokenKind::Verification);
            assert!(TokenKind::Verification.is_valid_format(&value), "{value}");
        }
    }

    #[test]
    fn test_backup_value_matches_own_format() {
        for _ in 0..20 {
            let value = generate_two_factor_value(TokenKind::Backup);
            assert!(TokenKind::Backup.is_valid_format(&value), "{value}");
        }
    }

    #[test]
    fn test_used_token_reported_as_already_used() {
        assert!(matches!(
            classify_token_state(true, false),
            Err(AppError::TokenAlreadyUsed)
        ));
        // 使用済みは期限切れより優先して報告される
        assert!(matches!(
            classify_token_state(true, true),
            Err(AppError::TokenAlreadyUsed)
        ));
    }

    #[test]
    fn test_expired_token_reported_as_expired() {
        assert!(matches!(
            classify_token_state(false, true),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn test_fresh_token_passes() {
        assert!(classify_token_state(false, false).is_ok());
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
    }
}
