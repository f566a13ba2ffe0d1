use crate::{access, admin, files, shared_text, AppState};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// 构建全部路由
pub fn build_router(state: AppState) -> Router {
    // 受保护路由（需要通过访问守卫）
    let protected_routes = Router::new()
        .route("/api/files", get(files::list_files))
        .route(
            "/api/upload",
            post(files::upload_files).layer(DefaultBodyLimit::max(files::UPLOAD_BODY_LIMIT)),
        )
        .route("/api/delete/:filename", delete(files::delete_file))
        .route(
            "/api/shared-text",
            get(shared_text::get_shared_text).post(shared_text::update_shared_text),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            access::access_guard,
        ));

    // 公开路由：下载不需要密码
    let public_routes = Router::new()
        .route("/", get(index))
        .route("/api/download/:filename", get(files::download_file));

    // 管理路由（只允许 localhost 访问）
    let admin_routes = Router::new()
        .route("/admin/metrics", get(admin::metrics))
        .route("/admin/lockouts", get(admin::list_lockouts))
        .route_layer(middleware::from_fn(admin::localhost_only));

    let static_files = ServeDir::new(&state.config.storage.public_dir);
    let uploads = ServeDir::new(state.files.dir());

    public_routes
        .merge(protected_routes)
        .merge(admin_routes)
        .nest_service("/uploads", uploads)
        .fallback_service(static_files)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// GET /：返回 public/index.html
async fn index(State(state): State<AppState>) -> Response {
    let path = state.config.storage.public_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => axum::response::Html(html).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}
