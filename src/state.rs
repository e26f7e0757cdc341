use std::sync::Arc;

use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{
    PasswordResetTokenRepository, TwoFactorTokenRepository, UserRepository,
};
use crate::services::{
    AuthService, Clock, EmailService, PasswordResetService, SessionService, TokenService,
    TotpService, TrustedDeviceService, TwoFactorService,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// ユーザーリポジトリ
    pub user_repo: UserRepository,
    /// 認証サービス（パスワード検証・ロックアウト）
    pub auth_service: AuthService,
    /// セッショントークンサービス
    pub session_service: SessionService,
    /// 使い捨てトークンサービス（リセット・2FA）
    pub token_service: TokenService,
    /// パスワードリセットサービス
    pub password_reset_service: PasswordResetService,
    /// 二要素認証サービス
    pub two_factor_service: TwoFactorService,
    /// 信頼済みデバイスサービス
    pub trusted_device_service: TrustedDeviceService,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config, clock: Clock) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let user_repo = UserRepository::new(db_pool.clone());
        let reset_token_repo = PasswordResetTokenRepository::new(db_pool.clone());
        let two_factor_token_repo = TwoFactorTokenRepository::new(db_pool.clone());

        let email_service = EmailService::new(config.clone());
        let auth_service = AuthService::new(user_repo.clone(), clock.clone());
        let session_service = SessionService::new(config.clone(), clock.clone());
        let token_service = TokenService::new(
            reset_token_repo,
            two_factor_token_repo,
            config.clone(),
            clock.clone(),
        );
        let totp_service = TotpService::new(
            config.totp_issuer.clone(),
            config.encryption_key.expose_secret(),
        )?;

        let password_reset_service = PasswordResetService::new(
            user_repo.clone(),
            auth_service.clone(),
            token_service.clone(),
            email_service.clone(),
            config.clone(),
        );
        let two_factor_service = TwoFactorService::new(
            user_repo.clone(),
            auth_service.clone(),
            totp_service,
            token_service.clone(),
            email_service,
            config.totp_issuer.clone(),
        );
        let trusted_device_service = TrustedDeviceService::new(user_repo.clone(), clock);

        Ok(Self {
            db_pool,
            config,
            user_repo,
            auth_service,
            session_service,
            token_service,
            password_reset_service,
            two_factor_service,
            trusted_device_service,
        })
    }
}
