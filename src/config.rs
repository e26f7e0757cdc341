use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_from_address: Option<String>,

    // パスワードリセット設定
    #[serde(default)]
    pub password_reset_url_base: Option<String>,
    #[serde(default = "default_password_reset_token_ttl_secs")]
    pub password_reset_token_ttl_secs: i64,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,
    /// AES-256暗号化キー（Base64エンコード、32バイト）
    pub encryption_key: SecretBox<String>,

    // セッション設定
    /// セッショントークン署名用シークレット（HS256）
    pub session_secret: SecretBox<String>,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 587;
// リセットトークンは5分で失効
const DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS: i64 = 300;
// セッションは24時間固定（リフレッシュ・失効機構なし）
const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_TOTP_ISSUER: &str = "SWIFT Pool Management";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_password_reset_token_ttl_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS
}

fn default_session_ttl_secs() -> i64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_totp_issuer() -> String {
    DEFAULT_TOTP_ISSUER.to_string()
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
