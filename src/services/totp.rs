use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use data_encoding::{BASE32, HEXUPPER};
use rand::RngCore;
use totp_rs::{Algorithm, TOTP};

use crate::error::AppError;
use crate::services::token::hash_token;

/// バックアップコードの発行数
pub const BACKUP_CODE_COUNT: usize = 10;

/// 2FA設定開始時にユーザーへ返す情報
#[derive(Debug)]
pub struct Provisioned {
    /// Base32エンコード済みシークレット（手動入力用キーと同一）
    pub secret: String,
    /// otpauth:// 形式のプロビジョニングURI
    pub provisioning_uri: String,
}

/// TOTP (Time-based One-Time Password) サービス
///
/// # Security
/// - シークレットはAES-256-GCMで暗号化してDB保存
/// - シークレット平文・バックアップコード平文はログに出力しない
#[derive(Clone)]
pub struct TotpService {
    issuer: String,
    encryption_key: [u8; 32],
}

impl TotpService {
    /// 新しい TotpService を作成
    ///
    /// # Arguments
    /// * `issuer` - TOTP発行者名（認証アプリに表示される）
    /// * `encryption_key_base64` - Base64エンコードされた32バイトの暗号化キー
    pub fn new(issuer: String, encryption_key_base64: &str) -> Result<Self, AppError> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        let key_bytes = STANDARD.decode(encryption_key_base64).map_err(|e| {
            tracing::error!(error = ?e, "TOTP暗号化キーのBase64デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid encryption key format"))
        })?;

        if key_bytes.len() != 32 {
            tracing::error!(
                expected = 32,
                actual = key_bytes.len(),
                "TOTP暗号化キーの長さが不正"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "encryption key must be 32 bytes"
            )));
        }

        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&key_bytes);

        Ok(Self {
            issuer,
            encryption_key,
        })
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32.encode(&bytes)
    }

    /// シークレットとプロビジョニングURIを生成（永続化はしない）
    ///
    /// 呼び出し側がシークレットを保留状態（未有効化）としてアカウントに保存する。
    pub fn provision(&self, account_email: &str) -> Result<Provisioned, AppError> {
        let secret = Self::generate_secret();
        let totp = self.create_totp(account_email, &secret)?;

        Ok(Provisioned {
            provisioning_uri: totp.get_url(),
            secret,
        })
    }

    /// シークレットをAES-256-GCMで暗号化
    ///
    /// # Returns
    /// 96ビットnonce (12バイト) + 暗号文
    pub fn encrypt_secret(&self, secret: &str) -> Result<Vec<u8>, AppError> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })?;

        // 96ビット (12バイト) のランダムnonce生成
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレット暗号化エラー");
            AppError::Internal(anyhow::anyhow!("encryption error"))
        })?;

        // nonce + ciphertext を結合
        let mut result = Vec::with_capacity(12 + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// 暗号化されたシークレットを復号
    pub fn decrypt_secret(&self, encrypted: &[u8]) -> Result<String, AppError> {
        if encrypted.len() < 12 {
            tracing::error!(len = encrypted.len(), "暗号化データが短すぎる");
            return Err(AppError::Internal(anyhow::anyhow!(
                "encrypted data too short"
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })?;

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
            tracing::error!(error = ?e, "シークレット復号エラー");
            AppError::Internal(anyhow::anyhow!("decryption error"))
        })?;

        String::from_utf8(plaintext).map_err(|e| {
            tracing::error!(error = ?e, "復号データのUTF-8変換エラー");
            AppError::Internal(anyhow::anyhow!("invalid utf8 after decryption"))
        })
    }

    /// QRコードを生成（PNG形式、Base64エンコード）
    ///
    /// # Arguments
    /// * `email` - ユーザーのメールアドレス（アカウント識別子）
    /// * `secret` - Base32エンコードされたシークレット
    pub fn generate_qr_code(&self, email: &str, secret: &str) -> Result<String, AppError> {
        let totp = self.create_totp(email, secret)?;

        let qr_code = totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::Internal(anyhow::anyhow!("qr code generation error"))
        })?;

        Ok(qr_code)
    }

    /// TOTPコードを検証（現在時刻）
    ///
    /// # Note
    /// 前後1ステップの時間ウィンドウを許容（±30秒）
    pub fn verify_code(&self, secret: &str, code: &str) -> Result<bool, AppError> {
        let current_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!(error = ?e, "システム時刻取得エラー");
                AppError::Internal(anyhow::anyhow!("system time error"))
            })?
            .as_secs();

        self.verify_code_at(secret, code, current_time)
    }

    /// TOTPコードを指定時刻で検証（テストで決定的に使う）
    pub fn verify_code_at(
        &self,
        secret: &str,
        code: &str,
        unix_secs: u64,
    ) -> Result<bool, AppError> {
        // 入力検証: コードは6桁の数字のみ
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let totp = self.create_totp_for_verify(secret)?;

        // check は内部で skew を考慮して検証
        Ok(totp.check(code, unix_secs))
    }

    /// バックアップコードを生成（平文を返す。保存はハッシュのみ）
    pub fn generate_backup_codes() -> Vec<String> {
        (0..BACKUP_CODE_COUNT)
            .map(|_| {
                let mut bytes = [0u8; 4];
                rand::thread_rng().fill_bytes(&mut bytes);
                HEXUPPER.encode(&bytes)
            })
            .collect()
    }

    /// バックアップコードのハッシュ化（SHA256 HEX）
    pub fn hash_backup_code(code: &str) -> String {
        hash_token(code)
    }

    /// バックアップコードを照合し、一致した場合は残集合を返す（ワンタイム）
    ///
    /// 一致したコードのみ集合から取り除く。呼び出し側が残集合を永続化すること。
    pub fn verify_backup_code(hashed_codes: &[String], presented: &str) -> Option<Vec<String>> {
        let presented_hash = Self::hash_backup_code(presented);
        let index = hashed_codes.iter().position(|c| *c == presented_hash)?;

        let mut remaining = hashed_codes.to_vec();
        remaining.remove(index);
        Some(remaining)
    }

    /// TOTP オブジェクトを作成（QRコード・URI生成用）
    fn create_totp(&self, email: &str, secret: &str) -> Result<TOTP, AppError> {
        let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid base32 secret"))
        })?;

        TOTP::new(
            Algorithm::SHA1,
            6,  // 6桁
            1,  // skew: 前後1ステップ許容
            30, // period: 30秒
            secret_bytes,
            Some(self.issuer.clone()),
            email.to_string(),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "TOTP作成エラー");
            AppError::Internal(anyhow::anyhow!("totp creation error"))
        })
    }

    /// TOTP オブジェクトを作成（検証用）
    fn create_totp_for_verify(&self, secret: &str) -> Result<TOTP, AppError> {
        let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid base32 secret"))
        })?;

        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            None,
            String::new(),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "TOTP作成エラー");
            AppError::Internal(anyhow::anyhow!("totp creation error"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    fn create_test_service() -> TotpService {
        // テスト用の32バイトキー
        let key = [0u8; 32];
        let key_base64 = STANDARD.encode(key);
        TotpService::new("TestPool".to_string(), &key_base64).unwrap()
    }

    fn code_at(secret: &str, unix_secs: u64) -> String {
        let secret_bytes = BASE32.decode(secret.as_bytes()).unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes, None, String::new()).unwrap();
        totp.generate(unix_secs)
    }

    #[test]
    fn test_generate_secret() {
        let secret = TotpService::generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
    }

    #[test]
    fn test_encrypt_decrypt_secret() {
        let service = create_test_service();
        let original = TotpService::generate_secret();

        let encrypted = service.encrypt_secret(&original).unwrap();
        // 12バイトnonce + 暗号文 + 16バイトtag
        assert!(encrypted.len() > 12);

        let decrypted = service.decrypt_secret(&encrypted).unwrap();
        assert_eq!(original, decrypted);
    }

    #[test]
    fn test_provision_round_trip() {
        let service = create_test_service();
        let provisioned = service.provision("test@example.com").unwrap();

        assert!(provisioned.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(provisioned.provisioning_uri.contains("TestPool"));

        // 返却されたシークレットから計算したコードは現在ステップで通る
        let now = 1_700_000_000u64;
        let code = code_at(&provisioned.secret, now);
        assert!(service.verify_code_at(&provisioned.secret, &code, now).unwrap());
    }

    #[test]
    fn test_verify_accepts_adjacent_step_only() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();
        let now = 1_700_000_010u64;

        // 現在ステップと前後1ステップは許容
        assert!(service.verify_code_at(&secret, &code_at(&secret, now), now).unwrap());
        assert!(service.verify_code_at(&secret, &code_at(&secret, now - 30), now).unwrap());
        assert!(service.verify_code_at(&secret, &code_at(&secret, now + 30), now).unwrap());
        // 2ステップ離れたコードは拒否
        assert!(!service.verify_code_at(&secret, &code_at(&secret, now - 90), now).unwrap());
        assert!(!service.verify_code_at(&secret, &code_at(&secret, now + 90), now).unwrap());
    }

    #[test]
    fn test_verify_invalid_code_format() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        // 6桁でない
        assert!(!service.verify_code(&secret, "12345").unwrap());
        // 数字以外を含む
        assert!(!service.verify_code(&secret, "12345a").unwrap());
    }

    #[test]
    fn test_generate_qr_code() {
        let service = create_test_service();
        let secret = TotpService::generate_secret();

        let qr_base64 = service
            .generate_qr_code("test@example.com", &secret)
            .unwrap();
        assert!(!qr_base64.is_empty());
    }

    #[test]
    fn test_backup_codes_format() {
        let codes = TotpService::generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), 8);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            );
        }
    }

    #[test]
    fn test_backup_code_single_use() {
        let codes = TotpService::generate_backup_codes();
        let hashed: Vec<String> = codes.iter().map(|c| TotpService::hash_backup_code(c)).collect();

        // 1回目は成功し、集合がちょうど1つ縮む
        let remaining = TotpService::verify_backup_code(&hashed, &codes[3]).unwrap();
        assert_eq!(remaining.len(), hashed.len() - 1);

        // 同じコードの2回目は失敗
        assert!(TotpService::verify_backup_code(&remaining, &codes[3]).is_none());

        // 別のコードはまだ使える
        assert!(TotpService::verify_backup_code(&remaining, &codes[4]).is_some());
    }

    #[test]
    fn test_unknown_backup_code_rejected() {
        let hashed = vec![TotpService::hash_backup_code("A1B2C3D4")];
        assert!(TotpService::verify_backup_code(&hashed, "FFFFFFFF").is_none());
    }

    #[test]
    fn test_new_with_invalid_key_length() {
        let short_key = STANDARD.encode([0u8; 16]);
        let result = TotpService::new("TestPool".to_string(), &short_key);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_with_invalid_base64() {
        let result = TotpService::new("TestPool".to_string(), "not-valid-base64!!!");
        assert!(result.is_err());
    }
}
