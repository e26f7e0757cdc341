use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::services::auth::AuthService;
use crate::services::email::EmailService;
use crate::services::token::TokenService;
use crate::services::totp::TotpService;

/// 2FA設定開始時の返却データ
#[derive(Debug, Serialize)]
pub struct SetupData {
    pub secret: String,
    pub qr_code: String,
    pub manual_entry_key: String,
    pub issuer: String,
    pub account_name: String,
}

/// 2FA状態
#[derive(Debug, Serialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub backup_codes_remaining: usize,
    pub has_secret: bool,
}

/// 二要素認証サービス
///
/// アカウントの2FA状態遷移を管理する:
/// `無効 → 保留（シークレット保存・未有効） → 有効（シークレット＋バックアップコード）`
/// および `有効 → 無効`（パスワードまたは現行TOTPコードでの再認証必須）。
/// どちらの遷移もセキュリティ通知イベントを発行する。
#[derive(Clone)]
pub struct TwoFactorService {
    user_repo: UserRepository,
    auth_service: AuthService,
    totp_service: TotpService,
    token_service: TokenService,
    email_service: EmailService,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(
        user_repo: UserRepository,
        auth_service: AuthService,
        totp_service: TotpService,
        token_service: TokenService,
        email_service: EmailService,
        issuer: String,
    ) -> Self {
        Self {
            user_repo,
            auth_service,
            totp_service,
            token_service,
            email_service,
            issuer,
        }
    }

    /// 2FA設定を開始（シークレット生成、QRコード返却）
    ///
    /// シークレットは暗号化して保留状態で保存する（まだ有効化しない）。
    /// 再設定（保留中のやり直し）は許可する。
    ///
    /// # Security
    /// シークレット平文はレスポンス以外に残さない。ログ出力禁止。
    pub async fn setup(&self, user_id: Uuid) -> Result<SetupData, AppError> {
        let user = self.find_user(user_id).await?;

        if user.two_factor_enabled {
            return Err(AppError::TotpAlreadyEnabled);
        }

        let provisioned = self.totp_service.provision(&user.email)?;

        let encrypted = self.totp_service.encrypt_secret(&provisioned.secret)?;
        self.user_repo
            .set_pending_two_factor_secret(user.id, &encrypted)
            .await?;

        let qr_code = self
            .totp_service
            .generate_qr_code(&user.email, &provisioned.secret)?;

        tracing::info!(user_id = %user.id, "2FA設定開始");

        Ok(SetupData {
            manual_entry_key: provisioned.secret.clone(),
            secret: provisioned.secret,
            qr_code: format!("data:image/png;base64,{qr_code}"),
            issuer: self.issuer.clone(),
            account_name: user.email,
        })
    }

    /// 初回コード検証で2FAを有効化し、バックアップコードを発行
    ///
    /// # Returns
    /// バックアップコードの平文（保存されるのはハッシュのみ。この返却が唯一の提示機会）
    pub async fn enable(&self, user_id: Uuid, code: &str) -> Result<Vec<String>, AppError> {
        let user = self.find_user(user_id).await?;

        if user.two_factor_enabled {
            return Err(AppError::TotpAlreadyEnabled);
        }

        let encrypted = user
            .two_factor_secret
            .as_deref()
            .ok_or(AppError::TotpSetupRequired)?;
        let secret = self.totp_service.decrypt_secret(encrypted)?;

        if !self.totp_service.verify_code(&secret, code)? {
            return Err(AppError::TotpInvalid);
        }

        let backup_codes = TotpService::generate_backup_codes();
        let hashed: Vec<String> = backup_codes
            .iter()
            .map(|c| TotpService::hash_backup_code(c))
            .collect();

        self.user_repo.enable_two_factor(user.id, &hashed).await?;

        tracing::info!(user_id = %user.id, "2FA有効化完了");

        self.notify_enabled(&user, backup_codes.len());

        Ok(backup_codes)
    }

    /// 2FAを無効化
    ///
    /// 再認証として現行TOTPコードまたはパスワードのいずれかが必須。
    /// 保留中の2FAトークンもすべて無効化する。
    pub async fn disable(
        &self,
        user_id: Uuid,
        password: Option<&str>,
        code: Option<&str>,
    ) -> Result<(), AppError> {
        let user = self.find_user(user_id).await?;

        if !user.two_factor_enabled {
            return Err(AppError::TotpNotEnabled);
        }

        // 再認証（信頼済みデバイスでは代替できない）
        match (code, password) {
            (Some(code), _) => {
                let encrypted = user
                    .two_factor_secret
                    .as_deref()
                    .ok_or(AppError::TotpNotEnabled)?;
                let secret = self.totp_service.decrypt_secret(encrypted)?;
                if !self.totp_service.verify_code(&secret, code)? {
                    return Err(AppError::TotpInvalid);
                }
            }
            (None, Some(password)) => {
                if !self.auth_service.verify_password(&user, password)? {
                    return Err(AppError::Authentication("invalid_password".to_string()));
                }
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "無効化にはパスワードまたは認証コードが必要です".to_string(),
                ));
            }
        }

        self.user_repo.disable_two_factor(user.id).await?;
        self.token_service
            .invalidate_two_factor_for_user(user.id)
            .await?;

        tracing::info!(user_id = %user.id, "2FA無効化完了");

        self.notify_disabled(&user);

        Ok(())
    }

    /// バックアップコードを再生成（旧コードはすべて無効になる）
    pub async fn regenerate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let user = self.find_user(user_id).await?;

        if !user.two_factor_enabled {
            return Err(AppError::TotpNotEnabled);
        }

        let backup_codes = TotpService::generate_backup_codes();
        let hashed: Vec<String> = backup_codes
            .iter()
            .map(|c| TotpService::hash_backup_code(c))
            .collect();

        self.user_repo.update_backup_codes(user.id, &hashed).await?;

        tracing::info!(user_id = %user.id, "バックアップコード再生成");

        Ok(backup_codes)
    }

    /// 2FA状態を取得
    pub async fn status(&self, user_id: Uuid) -> Result<TwoFactorStatus, AppError> {
        let user = self.find_user(user_id).await?;

        Ok(TwoFactorStatus {
            enabled: user.two_factor_enabled,
            backup_codes_remaining: user.backup_codes().len(),
            has_secret: user.has_two_factor_secret(),
        })
    }

    /// ログイン時の第二要素検証（TOTPコードまたはバックアップコード）
    ///
    /// バックアップコードは一致時に集合から取り除いて永続化する（ワンタイム）。
    /// ここでの失敗はパスワードのロックアウトカウンタとは独立。
    pub async fn verify_login(
        &self,
        user_id: Uuid,
        code: &str,
        is_backup_code: bool,
    ) -> Result<User, AppError> {
        let user = self.find_user(user_id).await?;

        if !user.two_factor_enabled {
            return Err(AppError::TotpNotEnabled);
        }

        if is_backup_code {
            let remaining = TotpService::verify_backup_code(user.backup_codes(), code)
                .ok_or(AppError::TotpInvalid)?;
            self.user_repo
                .update_backup_codes(user.id, &remaining)
                .await?;
            tracing::info!(user_id = %user.id, remaining = remaining.len(), "バックアップコード使用");
        } else {
            let encrypted = user
                .two_factor_secret
                .as_deref()
                .ok_or(AppError::TotpNotEnabled)?;
            let secret = self.totp_service.decrypt_secret(encrypted)?;
            if !self.totp_service.verify_code(&secret, code)? {
                tracing::warn!(user_id = %user.id, "2FA検証失敗");
                return Err(AppError::TotpInvalid);
            }
        }

        Ok(user)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Authentication("user not found".to_string()))
    }

    /// 有効化通知（fire-and-forget、失敗はログのみ）
    fn notify_enabled(&self, user: &User, backup_codes_count: usize) {
        if !user.security_notifications {
            return;
        }
        let email_service = self.email_service.clone();
        let to = user.email.clone();
        let fname = user.fname.clone();
        tokio::spawn(async move {
            if let Err(e) = email_service
                .send_two_factor_enabled_notification(&to, &fname, backup_codes_count)
                .await
            {
                tracing::warn!(error = ?e, "2FA有効化通知の送信に失敗");
            }
        });
    }

    /// 無効化通知（fire-and-forget、失敗はログのみ）
    fn notify_disabled(&self, user: &User) {
        if !user.security_notifications {
            return;
        }
        let email_service = self.email_service.clone();
        let to = user.email.clone();
        let fname = user.fname.clone();
        tokio::spawn(async move {
            if let Err(e) = email_service
                .send_two_factor_disabled_notification(&to, &fname)
                .await
            {
                tracing::warn!(error = ?e, "2FA無効化通知の送信に失敗");
            }
        });
    }
}
