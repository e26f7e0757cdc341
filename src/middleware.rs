use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::UserRole;
use crate::services::Claims;
use crate::state::AppState;

/// 認証済みユーザー（検証済みクレーム）
///
/// ポリシー検査を通過したリクエストの extension に挿入される。
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

/// ルートごとのアクセスポリシー
///
/// パス文字列の部分一致ではなく、ルートテーブルで宣言的に管理する。
/// テーブルに載っていないルートは認証必須として扱う（fail-closed）。
#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    /// セッショントークン必須か
    pub needs_auth: bool,
    /// 初回ログイン状態（パスワード未変更）を拒否するか
    pub needs_fresh_password: bool,
    /// 2FA有効アカウントに限定するか
    pub needs_2fa: bool,
    /// 許可ロール（None なら全ロール）
    pub roles: Option<&'static [UserRole]>,
}

impl RoutePolicy {
    pub const fn public() -> Self {
        Self {
            needs_auth: false,
            needs_fresh_password: false,
            needs_2fa: false,
            roles: None,
        }
    }

    pub const fn authenticated() -> Self {
        Self {
            needs_auth: true,
            needs_fresh_password: true,
            needs_2fa: false,
            roles: None,
        }
    }

    /// 認証必須だが初回ログイン（パスワード未変更）でも許可
    pub const fn authenticated_allow_first_login() -> Self {
        Self {
            needs_fresh_password: false,
            ..Self::authenticated()
        }
    }

    pub const fn roles(roles: &'static [UserRole]) -> Self {
        Self {
            roles: Some(roles),
            ..Self::authenticated()
        }
    }

    pub const fn with_2fa() -> Self {
        Self {
            needs_2fa: true,
            ..Self::authenticated()
        }
    }
}

/// ルートポリシーテーブル
///
/// パスの `{...}` セグメントは任意の1セグメントにマッチする。
const POLICY_TABLE: &[(&str, &str, RoutePolicy)] = &[
    ("GET", "/api/health", RoutePolicy::public()),
    ("POST", "/api/users/login", RoutePolicy::public()),
    ("POST", "/api/users/login/verify-2fa", RoutePolicy::public()),
    ("POST", "/api/users/signup", RoutePolicy::roles(&[UserRole::Admin])),
    ("POST", "/api/password/forgot", RoutePolicy::public()),
    ("GET", "/api/password/reset/{token}", RoutePolicy::public()),
    ("POST", "/api/password/reset", RoutePolicy::public()),
    // 初回ログイン中のユーザーが変更要否を確認するためのルート
    (
        "GET",
        "/api/password/requirements",
        RoutePolicy::authenticated_allow_first_login(),
    ),
    // 初回ログイン中でもパスワード変更だけは通す
    ("POST", "/api/password/change", RoutePolicy::authenticated_allow_first_login()),
    ("GET", "/api/two-factor/status", RoutePolicy::authenticated()),
    ("POST", "/api/two-factor/setup", RoutePolicy::authenticated()),
    ("POST", "/api/two-factor/enable", RoutePolicy::authenticated()),
    ("POST", "/api/two-factor/disable", RoutePolicy::with_2fa()),
    ("POST", "/api/two-factor/backup-codes", RoutePolicy::with_2fa()),
    ("GET", "/api/devices", RoutePolicy::authenticated()),
    ("POST", "/api/devices", RoutePolicy::authenticated()),
    ("DELETE", "/api/devices/{fingerprint}", RoutePolicy::authenticated()),
    (
        "PATCH",
        "/api/users/me/security-notifications",
        RoutePolicy::authenticated(),
    ),
];

/// ポリシー検査ミドルウェア
///
/// 1. テーブルからポリシーを引く（未登録は認証必須扱い）
/// 2. Bearer トークンを検証し、クレームを extension に挿入
/// 3. ロール・初回ログイン・2FA要件を検査
pub async fn require_policy(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let policy = policy_for(request.method().as_str(), request.uri().path());

    if !policy.needs_auth {
        return Ok(next.run(request).await);
    }

    let claims = authenticate_request(&state, &request)?;

    if let Some(allowed) = policy.roles
        && !allowed.contains(&claims.role)
    {
        tracing::warn!(user_id = %claims.sub, role = %claims.role.as_str(), "権限不足でアクセス拒否");
        return Err(AppError::Forbidden);
    }

    if policy.needs_fresh_password && claims.is_first_login {
        return Err(AppError::PasswordChangeRequired);
    }

    if policy.needs_2fa && !claims.two_factor_enabled {
        return Err(AppError::TotpNotEnabled);
    }

    request.extensions_mut().insert(CurrentUser(claims));

    Ok(next.run(request).await)
}

/// Bearer トークンを取り出してクレームを検証
fn authenticate_request(state: &AppState, request: &Request) -> Result<Claims, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Authentication("missing bearer token".to_string()))?;

    state.session_service.validate(token)
}

/// メソッドとパスからポリシーを引く
fn policy_for(method: &str, path: &str) -> RoutePolicy {
    POLICY_TABLE
        .iter()
        .find(|(m, pattern, _)| *m == method && pattern_matches(pattern, path))
        .map(|(_, _, policy)| *policy)
        .unwrap_or(RoutePolicy::authenticated())
}

/// パターンとパスのセグメント単位の照合（`{...}` は任意の1セグメント）
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segments = pattern.trim_matches('/').split('/');
    let mut path_segments = path.trim_matches('/').split('/');

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) => {
                if !p.starts_with('{') && p != s {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_exact_match() {
        assert!(pattern_matches("/api/users/login", "/api/users/login"));
        assert!(!pattern_matches("/api/users/login", "/api/users/signup"));
    }

    #[test]
    fn test_pattern_param_segment() {
        assert!(pattern_matches(
            "/api/password/reset/{token}",
            "/api/password/reset/abc123"
        ));
        assert!(!pattern_matches(
            "/api/password/reset/{token}",
            "/api/password/reset"
        ));
        assert!(!pattern_matches(
            "/api/password/reset/{token}",
            "/api/password/reset/abc/extra"
        ));
    }

    #[test]
    fn test_policy_public_routes() {
        assert!(!policy_for("GET", "/api/health").needs_auth);
        assert!(!policy_for("POST", "/api/users/login").needs_auth);
        assert!(!policy_for("GET", "/api/password/reset/0123abcd").needs_auth);
    }

    #[test]
    fn test_policy_unknown_route_requires_auth() {
        let policy = policy_for("GET", "/api/secret");
        assert!(policy.needs_auth);
        assert!(policy.needs_fresh_password);
    }

    #[test]
    fn test_policy_signup_admin_only() {
        let policy = policy_for("POST", "/api/users/signup");
        assert_eq!(policy.roles, Some(&[UserRole::Admin][..]));
    }

    #[test]
    fn test_policy_change_password_allows_first_login() {
        let policy = policy_for("POST", "/api/password/change");
        assert!(policy.needs_auth);
        assert!(!policy.needs_fresh_password);
    }

    #[test]
    fn test_policy_requirements_authenticated_allows_first_login() {
        let policy = policy_for("GET", "/api/password/requirements");
        assert!(policy.needs_auth);
        assert!(!policy.needs_fresh_password);
    }

    #[test]
    fn test_policy_backup_codes_requires_2fa() {
        assert!(policy_for("POST", "/api/two-factor/backup-codes").needs_2fa);
        assert!(policy_for("POST", "/api/two-factor/disable").needs_2fa);
        assert!(!policy_for("POST", "/api/two-factor/setup").needs_2fa);
    }
}
