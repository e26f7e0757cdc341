use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use http::{Method, header};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use aquagate::{config::Config, handlers, jobs, services::Clock, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化（JSON形式、環境変数でレベル制御）
    init_tracing();

    tracing::info!("aquagate 起動中...");

    // 設定読み込み
    let config = Config::load().map_err(|e| {
        tracing::error!(error = ?e, "設定の読み込みに失敗");
        anyhow::anyhow!("Failed to load config: {}", e)
    })?;

    tracing::info!(host = %config.host, port = %config.port, "設定読み込み完了");

    // サーバーアドレスを先に構築（config が move される前に）
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            tracing::error!(error = ?e, "アドレスのパースに失敗");
            anyhow::anyhow!("Failed to parse address: {}", e)
        })?;

    // データベース接続プール作成
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "データベース接続に失敗");
            anyhow::anyhow!("Failed to connect to database: {}", e)
        })?;

    tracing::info!("データベース接続完了");

    // AppState 構築
    let state = AppState::new(db_pool, config, Clock::system()).map_err(|e| {
        tracing::error!(error = ?e, "AppState の構築に失敗");
        anyhow::anyhow!("Failed to create AppState: {}", e)
    })?;

    // 期限切れトークンの定期削除
    jobs::spawn_cleanup_job(state.clone());

    // Router 構築
    let app = create_router(state);

    // サーバー起動
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(error = ?e, addr = %addr, "ポートのバインドに失敗");
        anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
    })?;

    tracing::info!(addr = %addr, "サーバー起動");

    // Graceful shutdown 対応
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "サーバーエラー");
            anyhow::anyhow!("Server error: {}", e)
        })?;

    tracing::info!("サーバー終了");

    Ok(())
}

/// tracing の初期化（JSON形式）
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aquagate=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Router の構築
///
/// 全ルートがポリシー検査ミドルウェアを通る（公開/認証/ロールはテーブルで宣言）。
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/api/health", get(handlers::health_check))
        // 認証
        .route("/api/users/signup", post(handlers::register))
        .route("/api/users/login", post(handlers::login))
        .route(
            "/api/users/login/verify-2fa",
            post(handlers::verify_second_factor),
        )
        // パスワード
        .route("/api/password/forgot", post(handlers::forgot_password))
        .route(
            "/api/password/reset/{token}",
            get(handlers::verify_reset_token),
        )
        .route("/api/password/reset", post(handlers::reset_password))
        .route("/api/password/change", post(handlers::change_password))
        .route(
            "/api/password/requirements",
            get(handlers::password_requirements),
        )
        // 二要素認証
        .route("/api/two-factor/setup", post(handlers::setup_2fa))
        .route("/api/two-factor/enable", post(handlers::enable_2fa))
        .route("/api/two-factor/disable", post(handlers::disable_2fa))
        .route("/api/two-factor/status", get(handlers::two_factor_status))
        .route(
            "/api/two-factor/backup-codes",
            post(handlers::regenerate_backup_codes),
        )
        // 信頼済みデバイス
        .route(
            "/api/devices",
            get(handlers::list_devices).post(handlers::add_device),
        )
        .route("/api/devices/{fingerprint}", delete(handlers::remove_device))
        // 通知設定
        .route(
            "/api/users/me/security-notifications",
            patch(handlers::update_security_notifications),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            aquagate::middleware::require_policy,
        ))
        .layer(cors)
        .with_state(state)
}

/// Graceful shutdown シグナル待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Ctrl+C ハンドラーのインストールに失敗");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "SIGTERM ハンドラーのインストールに失敗");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        }
    }
}
