use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::services::clock::Clock;

/// 連続ログイン失敗の許容回数（到達でロック）
pub const MAX_LOGIN_ATTEMPTS: i32 = 5;
/// ロック時間（分）
pub const LOCK_DURATION_MINUTES: i32 = 30;
/// パスワードに必須の記号セット
pub const PASSWORD_SYMBOLS: &str = "@$!%*?&";

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// パスワードポリシー検証
///
/// 8〜128文字、小文字・大文字・数字・記号（@$!%*?&）を各1文字以上
pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::WeakPassword(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    if password.len() > 128 {
        return Err(AppError::WeakPassword(
            "パスワードは128文字以内で入力してください".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(AppError::WeakPassword(
            "パスワードには小文字を1文字以上含めてください".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(AppError::WeakPassword(
            "パスワードには大文字を1文字以上含めてください".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::WeakPassword(
            "パスワードには数字を1文字以上含めてください".to_string(),
        ));
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        return Err(AppError::WeakPassword(format!(
            "パスワードには記号（{PASSWORD_SYMBOLS}）を1文字以上含めてください"
        )));
    }
    Ok(())
}

/// 認証サービス（パスワード検証・ロックアウト・パスワード更新）
#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    clock: Clock,
}

impl AuthService {
    pub fn new(user_repo: UserRepository, clock: Clock) -> Self {
        Self { user_repo, clock }
    }

    /// ユーザー認証を実行（ロックアウト込み）
    ///
    /// 順序: ロック確認 → パスワード検証 → 成功/失敗の記録。
    /// ロック中は正しいパスワードでも `AccountLocked` を返す。
    ///
    /// タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let user = self.user_repo.find_by_email(email).await?;

        let user = match user {
            Some(user) => user,
            None => {
                // タイミング攻撃対策: ユーザーが存在しない場合も同等のハッシュ計算を実行
                // これにより、ユーザーの存在有無を応答時間から推測できなくなる
                let _ = hash_password(password);
                tracing::warn!(email = %email, "認証失敗: ユーザー不在");
                return Err(AppError::Authentication("invalid_credentials".to_string()));
            }
        };

        let now = self.clock.now();

        match evaluate_login(&user, now, || {
            verify_password_hash(password, &user.password_hash)
        }) {
            Ok(LoginOutcome::Accept) => {
                self.user_repo.record_success(user.id).await?;
                tracing::info!(user_id = %user.id, "認証成功");
                Ok(user)
            }
            Ok(LoginOutcome::WrongPassword) => {
                let outcome = self
                    .user_repo
                    .record_failed_attempt(user.id, MAX_LOGIN_ATTEMPTS, LOCK_DURATION_MINUTES)
                    .await?;
                let error = failed_attempt_error(outcome.login_attempts);
                match &error {
                    AppError::AccountLocked { .. } => {
                        tracing::warn!(user_id = %user.id, attempts = outcome.login_attempts, "アカウントをロック");
                    }
                    _ => {
                        tracing::warn!(user_id = %user.id, attempts = outcome.login_attempts, "認証失敗: パスワード不一致");
                    }
                }
                Err(error)
            }
            Err(error) => {
                if let AppError::AccountLocked { remaining_minutes } = &error {
                    tracing::warn!(user_id = %user.id, remaining_minutes = *remaining_minutes, "認証拒否: アカウントロック中");
                }
                Err(error)
            }
        }
    }

    /// 再認証用のパスワード検証（カウンタを動かさない）
    pub fn verify_password(&self, user: &User, password: &str) -> Result<bool, AppError> {
        verify_password_hash(password, &user.password_hash)
    }

    /// パスワードを設定
    ///
    /// ポリシー検証と現行パスワードとの同一チェックを行った上で更新。
    /// 更新時に初回ログインフラグとロックアウトカウンタもリセットされる。
    pub async fn set_password(&self, user: &User, new_password: &str) -> Result<(), AppError> {
        validate_password_strength(new_password)?;

        if verify_password_hash(new_password, &user.password_hash)? {
            return Err(AppError::SamePassword);
        }

        let password_hash = hash_password(new_password)?;
        self.user_repo.update_password(user.id, &password_hash).await?;

        tracing::info!(user_id = %user.id, "パスワード更新完了");

        Ok(())
    }
}

/// ゲート通過後の判定結果
#[derive(Debug, PartialEq, Eq)]
enum LoginOutcome {
    Accept,
    WrongPassword,
}

/// ログインのゲート判定（純粋関数）
///
/// 順序: ロック確認 → パスワード検証。ロック中は検証クロージャを
/// 一切呼ばずに `AccountLocked` を返す（正しいパスワードでも解除されない）。
fn evaluate_login(
    user: &User,
    now: time::OffsetDateTime,
    verify: impl FnOnce() -> Result<bool, AppError>,
) -> Result<LoginOutcome, AppError> {
    if user.is_locked(now) {
        return Err(AppError::AccountLocked {
            remaining_minutes: user.remaining_lock_minutes(now),
        });
    }

    if verify()? {
        Ok(LoginOutcome::Accept)
    } else {
        Ok(LoginOutcome::WrongPassword)
    }
}

/// 失敗記録後のカウンタ値からエラーを決定
///
/// 閾値到達（5回目）はロック通知、それ未満は残り回数つきの認証失敗。
fn failed_attempt_error(login_attempts: i32) -> AppError {
    if login_attempts >= MAX_LOGIN_ATTEMPTS {
        AppError::AccountLocked {
            remaining_minutes: LOCK_DURATION_MINUTES as i64,
        }
    } else {
        AppError::InvalidCredentials {
            remaining_attempts: MAX_LOGIN_ATTEMPTS - login_attempts,
        }
    }
}

/// パスワードをハッシュと照合
fn verify_password_hash(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| {
        tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
        AppError::Internal(anyhow::anyhow!("password hash parse error"))
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("Secur3!pass").unwrap();
        assert!(verify_password_hash("Secur3!pass", &hash).unwrap());
        assert!(!verify_password_hash("Secur3!pasS", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format_is_error() {
        let result = verify_password_hash("whatever", "invalid_hash_format");
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_rejects_short_password() {
        assert!(validate_password_strength("Ab1@xyz").is_err());
    }

    #[test]
    fn test_policy_rejects_overlong_password() {
        let long = format!("Ab1@{}", "x".repeat(130));
        assert!(validate_password_strength(&long).is_err());
    }

    #[test]
    fn test_policy_requires_each_character_class() {
        assert!(validate_password_strength("alllower1@").is_err()); // 大文字なし
        assert!(validate_password_strength("ALLUPPER1@").is_err()); // 小文字なし
        assert!(validate_password_strength("NoDigits!@Ab").is_err()); // 数字なし
        assert!(validate_password_strength("NoSymbol1Ab").is_err()); // 記号なし
    }

    #[test]
    fn test_policy_accepts_conforming_password() {
        assert!(validate_password_strength("Str0ng&pass").is_ok());
    }

    #[test]
    fn test_same_password_detected_via_hash() {
        let hash = hash_password("Current1!pw").unwrap();
        // set_password の同一チェックと同じ照合経路
        assert!(verify_password_hash("Current1!pw", &hash).unwrap());
    }

    use crate::models::UserRole;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn gate_user(locked_until: Option<OffsetDateTime>) -> User {
        let now = OffsetDateTime::UNIX_EPOCH;
        User {
            id: Uuid::new_v4(),
            fname: "Taro".to_string(),
            lname: "Yamada".to_string(),
            email: "taro@example.com".to_string(),
            phone: None,
            location: None,
            role: UserRole::Operator,
            gender: None,
            password_hash: String::new(),
            is_first_login: false,
            password_changed_at: None,
            last_login_at: None,
            login_attempts: 0,
            locked_until,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_codes: None,
            trusted_devices: None,
            security_notifications: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_locked_account_rejected_before_password_check() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let user = gate_user(Some(now + Duration::minutes(30)));

        // ロック中はパスワード検証が一切呼ばれない
        let result = evaluate_login(&user, now, || {
            panic!("ロック中にパスワード検証が実行された")
        });

        match result {
            Err(AppError::AccountLocked { remaining_minutes }) => {
                assert_eq!(remaining_minutes, 30);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_expired_lock_allows_correct_password() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let user = gate_user(Some(now - Duration::seconds(1)));

        let outcome = evaluate_login(&user, now, || Ok(true)).unwrap();
        assert_eq!(outcome, LoginOutcome::Accept);
    }

    #[test]
    fn test_wrong_password_flows_to_failure_recording() {
        let user = gate_user(None);
        let outcome = evaluate_login(&user, OffsetDateTime::UNIX_EPOCH, || Ok(false)).unwrap();
        assert_eq!(outcome, LoginOutcome::WrongPassword);
    }

    #[test]
    fn test_fifth_failure_reports_lock() {
        match failed_attempt_error(MAX_LOGIN_ATTEMPTS) {
            AppError::AccountLocked { remaining_minutes } => {
                assert_eq!(remaining_minutes, LOCK_DURATION_MINUTES as i64);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_earlier_failures_report_remaining_attempts() {
        match failed_attempt_error(3) {
            AppError::InvalidCredentials { remaining_attempts } => {
                assert_eq!(remaining_attempts, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
