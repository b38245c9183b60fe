use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripmate_backend::{
    AppState,
    config::Config,
    db,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    realtime::{ConnectionRegistry, RoomHub, socket},
    routes,
};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池并跑迁移
    let pool = db::connect(&config)
        .await
        .expect("Failed to connect to Postgres");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // 设置 Redis 客户端（限流用）
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        rooms: Arc::new(RoomHub::new()),
        registry: Arc::new(ConnectionRegistry::new()),
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // WebSocket 在握手时用查询参数里的令牌自行鉴权
    let public_routes = Router::new().route("/ws", get(socket::ws_handler));

    let protected_routes = Router::new()
        // 群组路由
        .route("/groups/create", post(routes::group::create_group))
        .route("/groups/details", get(routes::group::group_details))
        .route("/groups/members", get(routes::group::group_members))
        .route("/groups/invite", post(routes::group::create_invite))
        .route("/groups/thumbnail", put(routes::group::update_thumbnail))
        // 行程路由
        .route("/trips/create", post(routes::trip::create_trip))
        .route("/trips/details", get(routes::trip::trip_details))
        .route("/trips/mine", get(routes::trip::my_trips))
        .route("/trips/upcoming", get(routes::trip::upcoming_trip))
        .route("/trips/joined", get(routes::trip::joined_group_trip))
        .route("/trips/locations/add", post(routes::trip::add_location))
        .route("/trips/locations/update", put(routes::trip::update_location))
        .route(
            "/trips/locations/delete",
            delete(routes::trip::delete_location),
        )
        // 账单路由
        .route("/payments/save", post(routes::payment::save_payments))
        .route("/payments/by-trip", get(routes::payment::payments_by_trip))
        .route("/payments/update", put(routes::payment::update_payments))
        .route("/payments/members", get(routes::payment::payment_members))
        // 退出与历史
        .route("/departure/trip", delete(routes::departure::leave_trip))
        .route("/history/finished", get(routes::history::finished_trips))
        .route("/analysis/expenses", get(routes::analysis::expense_analysis))
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(public_routes).merge(protected_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
