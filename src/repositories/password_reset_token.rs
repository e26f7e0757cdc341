use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::PasswordResetToken;

const TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, is_used, used_at, ip_address, user_agent, created_at";

#[derive(Clone)]
pub struct PasswordResetTokenRepository {
    pool: PgPool,
}

impl PasswordResetTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 既存の有効トークンを無効化してから新しいトークンを作成（単一トランザクション）
    ///
    /// 「ユーザーごとに有効なリセットトークンは常に1件」の不変条件を
    /// 並行リクエスト下でも保証する。
    ///
    /// # Arguments
    /// * `token_hash` - トークンのSHA256ハッシュ（平文は保存しない）
    pub async fn replace_for_user(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<PasswordResetToken, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE password_reset_tokens
            SET is_used = true, used_at = NOW()
            WHERE user_id = $1 AND is_used = false
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO password_reset_tokens (user_id, token_hash, expires_at, ip_address, user_agent) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {TOKEN_COLUMNS}"
        );
        let token = sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .bind(ip_address)
            .bind(user_agent)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(token)
    }

    /// トークンハッシュでトークンを検索（使用済みも含む）
    ///
    /// # Note
    /// 使用済み・有効期限の判定は呼び出し側で行う
    pub async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, sqlx::Error> {
        let sql =
            format!("SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE token_hash = $1");
        sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
    }

    /// トークンを使用済みにマーク
    ///
    /// 既に使用済みの場合は何もしない（冪等）
    pub async fn mark_as_used(&self, token_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE password_reset_tokens
            SET is_used = true, used_at = NOW()
            WHERE token_hash = $1 AND is_used = false
            "#,
        )
        .bind(token_hash)
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
            DELETE FROM password_reset_tokens
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
