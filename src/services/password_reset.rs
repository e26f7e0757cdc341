use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::services::auth::AuthService;
use crate::services::email::EmailService;
use crate::services::token::{RequestMeta, TokenService};

/// リセットトークン事前検証の返却データ
#[derive(Debug, Serialize)]
pub struct ResetTokenInfo {
    pub email: String,
    pub fname: String,
}

/// パスワードリセットサービス
///
/// 依頼 → 事前検証 → 実行の3段階。依頼のレスポンスはメールの存在に
/// かかわらず一定（アカウント列挙対策）。トークンの消費は実行成功時のみ。
#[derive(Clone)]
pub struct PasswordResetService {
    user_repo: UserRepository,
    auth_service: AuthService,
    token_service: TokenService,
    email_service: EmailService,
    config: Arc<Config>,
}

impl PasswordResetService {
    pub fn new(
        user_repo: UserRepository,
        auth_service: AuthService,
        token_service: TokenService,
        email_service: EmailService,
        config: Arc<Config>,
    ) -> Self {
        Self {
            user_repo,
            auth_service,
            token_service,
            email_service,
            config,
        }
    }

    /// リセットを依頼
    ///
    /// メールアドレスが未登録でも成功として扱う。送信はfire-and-forgetで、
    /// 失敗してもレスポンスには影響しない（ログのみ）。
    pub async fn request_reset(&self, email: &str, meta: &RequestMeta) -> Result<(), AppError> {
        let Some(user) = self.user_repo.find_by_email(email).await? else {
            // 列挙対策: 未登録でも同じレスポンス
            tracing::info!("未登録メールアドレスへのリセット依頼");
            return Ok(());
        };

        let issued = self.token_service.issue_reset(user.id, meta).await?;
        let reset_url = self.build_reset_url(&issued.value);

        let email_service = self.email_service.clone();
        let to = user.email.clone();
        let fname = user.fname.clone();
        tokio::spawn(async move {
            if let Err(e) = email_service
                .send_password_reset_email(&to, &fname, &reset_url)
                .await
            {
                tracing::warn!(error = ?e, "リセットメールの送信に失敗");
            }
        });

        Ok(())
    }

    /// リセットトークンを事前検証（フォーム表示前のチェック用、消費しない）
    pub async fn verify_token(&self, token: &str) -> Result<ResetTokenInfo, AppError> {
        let reset_token = self.token_service.verify_reset(token).await?;

        let user = self
            .user_repo
            .find_by_id(reset_token.user_id)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        Ok(ResetTokenInfo {
            email: user.email,
            fname: user.fname,
        })
    }

    /// トークンを使ってパスワードを再設定
    ///
    /// 検証 → 強度チェック → 更新 → 消費の順。更新に成功した場合のみ
    /// トークンを使用済みにする。更新はロックアウト状態も解除する。
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<User, AppError> {
        if new_password != confirm_password {
            return Err(AppError::Validation(
                "パスワードが一致しません".to_string(),
            ));
        }

        let reset_token = self.token_service.verify_reset(token).await?;

        let user = self
            .user_repo
            .find_by_id(reset_token.user_id)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        self.auth_service.set_password(&user, new_password).await?;
        self.token_service.consume_reset(token).await?;

        tracing::info!(user_id = %user.id, "パスワードリセット完了");

        Ok(user)
    }

    fn build_reset_url(&self, token: &str) -> String {
        match &self.config.password_reset_url_base {
            Some(base) => format!("{}/{token}", base.trim_end_matches('/')),
            None => format!("/reset-password/{token}"),
        }
    }
}
