use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{TokenKind, TwoFactorToken};

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, token_kind, expires_at, is_used, used_at, \
     ip_address, user_agent, device_fingerprint, created_at";

#[derive(Clone)]
pub struct TwoFactorTokenRepository {
    pool: PgPool,
}

impl TwoFactorTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 同種の有効トークンを無効化してから新しいトークンを作成（単一トランザクション）
    ///
    /// (user, kind) ごとに有効なトークンは常に1件。
    pub async fn replace_for_user(
        &self,
        user_id: Uuid,
        token_hash: &str,
        kind: TokenKind,
        expires_at: OffsetDateTime,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        device_fingerprint: Option<&str>,
    ) -> Result<TwoFactorToken, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE two_factor_tokens
            SET is_used = true, used_at = NOW()
            WHERE user_id = $1 AND token_kind = $2 AND is_used = false
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO two_factor_tokens \
             (user_id, token_hash, token_kind, expires_at, ip_address, user_agent, device_fingerprint) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {TOKEN_COLUMNS}"
        );
        let token = sqlx::query_as::<_, TwoFactorToken>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(kind)
            .bind(expires_at)
            .bind(ip_address)
            .bind(user_agent)
            .bind(device_fingerprint)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(token)
    }

    /// ユーザー・ハッシュ・種別でトークンを検索（使用済みも含む）
    ///
    /// # Note
    /// 使用済み・有効期限の判定は呼び出し側で行う
    pub async fn find_by_hash(
        &self,
        user_id: Uuid,
        token_hash: &str,
        kind: TokenKind,
    ) -> Result<Option<TwoFactorToken>, sqlx::Error> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM two_factor_tokens \
             WHERE user_id = $1 AND token_hash = $2 AND token_kind = $3"
        );
        sqlx::query_as::<_, TwoFactorToken>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
    }

    /// トークンを使用済みにマーク（冪等）
    pub async fn mark_as_used(
        &self,
        user_id: Uuid,
        token_hash: &str,
        kind: TokenKind,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE two_factor_tokens
            SET is_used = true, used_at = NOW()
            WHERE user_id = $1 AND token_hash = $2 AND token_kind = $3 AND is_used = false
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(kind)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// ユーザーの未使用トークンをすべて無効化（2FA無効化時など）
    pub async fn invalidate_for_user(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE two_factor_tokens
            SET is_used = true, used_at = NOW()
            WHERE user_id = $1 AND is_used = false
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 期限切れトークンを削除
    ///
    /// # Returns
    /// 削除された行数
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM two_factor_tokens
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
