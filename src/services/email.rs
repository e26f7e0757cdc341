use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;

/// セキュリティ通知メールサービス
///
/// 送信は常に呼び出し元の処理と切り離して行う（tokio::spawn）。
/// 送信失敗は警告ログのみで、親処理を失敗させてはならない。
///
/// SMTP未設定時（または email 機能無効時）はログ出力のみのスタブとして動く。
#[derive(Clone)]
pub struct EmailService {
    config: Arc<Config>,
}

impl EmailService {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// パスワードリセットメールを送信
    ///
    /// # Security
    /// リセットURL（トークン含む）は宛先以外に出さない。ログにも出力しない。
    pub async fn send_password_reset_email(
        &self,
        to: &str,
        fname: &str,
        reset_url: &str,
    ) -> Result<(), AppError> {
        let body = format!(
            "{fname} 様\n\n\
             パスワードリセットのリクエストを受け付けました。\n\
             以下のURLから5分以内に新しいパスワードを設定してください。\n\n\
             {reset_url}\n\n\
             心当たりがない場合はこのメールを無視してください。"
        );
        self.deliver(to, "パスワードリセットのご案内", body).await
    }

    /// 2FA有効化通知を送信
    pub async fn send_two_factor_enabled_notification(
        &self,
        to: &str,
        fname: &str,
        backup_codes_count: usize,
    ) -> Result<(), AppError> {
        let body = format!(
            "{fname} 様\n\n\
             アカウントの二要素認証が有効化されました。\n\
             バックアップコード {backup_codes_count} 件が発行されています。\n\
             安全な場所に保管してください。\n\n\
             心当たりがない場合は至急パスワードを変更してください。"
        );
        self.deliver(to, "二要素認証が有効化されました", body).await
    }

    /// 2FA無効化通知を送信
    pub async fn send_two_factor_disabled_notification(
        &self,
        to: &str,
        fname: &str,
    ) -> Result<(), AppError> {
        let body = format!(
            "{fname} 様\n\n\
             アカウントの二要素認証が無効化されました。\n\n\
             心当たりがない場合は至急パスワードを変更してください。"
        );
        self.deliver(to, "二要素認証が無効化されました", body).await
    }

    /// メールを配送（SMTP設定時）またはログ出力（開発モード）
    async fn deliver(&self, to: &str, subject: &str, body: String) -> Result<(), AppError> {
        let smtp_configured = self.config.smtp_host.is_some()
            && self.config.smtp_username.is_some()
            && self.config.smtp_password.is_some()
            && self.config.smtp_from_address.is_some();

        if !smtp_configured {
            // 開発モード: メール送信せずログ出力のみ（本文は出さない）
            tracing::info!(to = %to, subject = %subject, "メール送信（開発モード、配送スキップ）");
            return Ok(());
        }

        #[cfg(feature = "email")]
        {
            self.send_via_smtp(to, subject, body).await
        }

        #[cfg(not(feature = "email"))]
        {
            let _ = body;
            tracing::warn!(
                to = %to,
                subject = %subject,
                "SMTP設定済みだが email 機能が無効のため配送スキップ"
            );
            Ok(())
        }
    }

    #[cfg(feature = "email")]
    async fn send_via_smtp(&self, to: &str, subject: &str, body: String) -> Result<(), AppError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
        use secrecy::ExposeSecret;

        let host = self.config.smtp_host.as_deref().unwrap_or_default();
        let from = self.config.smtp_from_address.as_deref().unwrap_or_default();
        let username = self
            .config
            .smtp_username
            .as_ref()
            .map(|s| s.expose_secret().clone())
            .unwrap_or_default();
        let password = self
            .config
            .smtp_password
            .as_ref()
            .map(|s| s.expose_secret().clone())
            .unwrap_or_default();

        let message = Message::builder()
            .from(from.parse().map_err(|e| {
                tracing::error!(error = ?e, "送信元アドレスのパースエラー");
                AppError::Internal(anyhow::anyhow!("invalid from address"))
            })?)
            .to(to.parse().map_err(|e| {
                tracing::error!(error = ?e, "宛先アドレスのパースエラー");
                AppError::Internal(anyhow::anyhow!("invalid to address"))
            })?)
            .subject(subject)
            .body(body)
            .map_err(|e| {
                tracing::error!(error = ?e, "メール構築エラー");
                AppError::Internal(anyhow::anyhow!("email build error"))
            })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| {
                tracing::error!(error = ?e, "SMTPトランスポート初期化エラー");
                AppError::Internal(anyhow::anyhow!("smtp transport error"))
            })?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(username, password))
            .build();

        mailer.send(message).await.map_err(|e| {
            tracing::error!(error = ?e, "メール送信エラー");
            AppError::Internal(anyhow::anyhow!("smtp send error"))
        })?;

        tracing::info!(to = %to, subject = %subject, "メール送信完了");

        Ok(())
    }
}
