use sqlx::PgPool;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{TrustedDevice, User, UserRole};

/// ユーザー作成時の入力
#[derive(Debug)]
pub struct NewUser<'a> {
    pub fname: &'a str,
    pub lname: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub location: Option<&'a str>,
    pub role: UserRole,
    pub gender: Option<&'a str>,
    pub password_hash: &'a str,
}

/// 失敗試行記録の結果（更新後の値）
#[derive(Debug, sqlx::FromRow)]
pub struct FailedAttemptOutcome {
    pub login_attempts: i32,
    pub locked_until: Option<OffsetDateTime>,
}

const USER_COLUMNS: &str = "id, fname, lname, email, phone, location, role, gender, \
     password_hash, is_first_login, password_changed_at, last_login_at, \
     login_attempts, locked_until, two_factor_enabled, two_factor_secret, \
     backup_codes, trusted_devices, security_notifications, created_at, updated_at";

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// メールアドレスでユーザーを検索
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// ユーザーIDでユーザーを検索
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// 新しいユーザーを作成
    ///
    /// # Errors
    /// - UNIQUE制約違反時: `sqlx::Error::Database` (constraint = "users_email_key")
    ///   呼び出し側で `AppError::EmailAlreadyExists` に変換すること
    pub async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        let sql = format!(
            "INSERT INTO users (fname, lname, email, phone, location, role, gender, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(new_user.fname)
            .bind(new_user.lname)
            .bind(new_user.email)
            .bind(new_user.phone)
            .bind(new_user.location)
            .bind(new_user.role)
            .bind(new_user.gender)
            .bind(new_user.password_hash)
            .fetch_one(&self.pool)
            .await
    }

    /// ユーザーのパスワードを更新
    ///
    /// 初回ログインフラグとロックアウトカウンタも同時にリセットする。
    ///
    /// # Note
    /// password_hash はログに出力しないこと
    pub async fn update_password(
        &self,
        user_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = NOW(),
                is_first_login = false,
                login_attempts = 0,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(new_password_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// ログイン失敗を記録（原子的）
    ///
    /// カウンタのインクリメントと閾値到達時のロック設定を単一UPDATEで行い、
    /// 並行リクエスト間の read-increment-write 競合を避ける。
    pub async fn record_failed_attempt(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lock_minutes: i32,
    ) -> Result<FailedAttemptOutcome, sqlx::Error> {
        sqlx::query_as::<_, FailedAttemptOutcome>(
            r#"
            UPDATE users
            SET login_attempts = login_attempts + 1,
                locked_until = CASE WHEN login_attempts + 1 >= $2
                                    THEN NOW() + ($3 * interval '1 minute')
                                    ELSE locked_until END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING login_attempts, locked_until
            "#,
        )
        .bind(user_id)
        .bind(max_attempts)
        .bind(lock_minutes)
        .fetch_one(&self.pool)
        .await
    }

    /// ログイン成功を記録（カウンタとロックをクリア）
    pub async fn record_success(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET login_attempts = 0,
                locked_until = NULL,
                last_login_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 保留中の2FAシークレットを保存（まだ有効化しない）
    pub async fn set_pending_two_factor_secret(
        &self,
        user_id: Uuid,
        secret_encrypted: &[u8],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_secret = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(secret_encrypted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 2FAを有効化し、ハッシュ済みバックアップコードを保存
    pub async fn enable_two_factor(
        &self,
        user_id: Uuid,
        hashed_backup_codes: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = true, backup_codes = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(Json(hashed_backup_codes))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 2FAを無効化（シークレットとバックアップコードも破棄）
    pub async fn disable_two_factor(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = false,
                two_factor_secret = NULL,
                backup_codes = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// バックアップコード集合を置き換え（再生成・消費後の永続化）
    pub async fn update_backup_codes(
        &self,
        user_id: Uuid,
        hashed_backup_codes: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET backup_codes = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(Json(hashed_backup_codes))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 信頼済みデバイスリストを置き換え
    pub async fn update_trusted_devices(
        &self,
        user_id: Uuid,
        devices: &[TrustedDevice],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET trusted_devices = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(Json(devices))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// セキュリティ通知設定を更新
    pub async fn update_security_notifications(
        &self,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET security_notifications = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
