use super::guard::AccessRequest;
use super::network::resolve_client_ip;
use super::store::AttemptStore;
use crate::{error::AppError, AppState};
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::header::HOST,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;

/// 密码请求头
pub const PASSWORD_HEADER: &str = "x-access-password";

#[derive(Debug, Deserialize)]
struct PasswordQuery {
    password: Option<String>,
}

/// 从请求中提取守卫需要的输入
pub fn access_request_from(request: &Request, trust_proxy: bool) -> AccessRequest {
    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // 请求头优先，其次是查询参数
    let password = headers
        .get(PASSWORD_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| {
            Query::<PasswordQuery>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(q)| q.password)
        });

    AccessRequest {
        ip: resolve_client_ip(headers, peer, trust_proxy),
        host,
        password,
    }
}

/// 密码验证中间件
///
/// 放行时继续执行后续处理器；否则直接返回 401，处理器不会运行。
pub async fn access_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access = access_request_from(&request, state.config.server.trust_proxy);
    let verdict = state.access_guard.evaluate(&access, Utc::now());

    state.metrics.record_verdict(&verdict);
    state
        .metrics
        .tracked_ips
        .set(state.access_guard.store().len() as i64);

    if verdict.decision.is_allowed() {
        return Ok(next.run(request).await);
    }

    Err(AppError::AccessDenied(verdict.decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn build(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_password_from_header_wins() {
        let request = build(
            "/api/files?password=fromquery",
            &[(PASSWORD_HEADER, "fromheader"), ("host", "nas.lan:3000")],
        );
        let access = access_request_from(&request, true);
        assert_eq!(access.password.as_deref(), Some("fromheader"));
        assert_eq!(access.host, "nas.lan:3000");
    }

    #[test]
    fn test_password_from_query() {
        let request = build("/api/shared-text?password=abc%20123&x=1", &[]);
        let access = access_request_from(&request, true);
        assert_eq!(access.password.as_deref(), Some("abc 123"));
        assert_eq!(access.host, "");
        assert_eq!(access.ip, "");
    }

    #[test]
    fn test_peer_address_from_connect_info() {
        let mut request = build("/api/files", &[("x-forwarded-for", "8.8.8.8")]);
        let peer: SocketAddr = "192.168.0.7:41000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(access_request_from(&request, true).ip, "8.8.8.8");
        assert_eq!(access_request_from(&request, false).ip, "192.168.0.7");
        assert!(access_request_from(&request, false).password.is_none());
    }

    #[test]
    fn test_external_peer_cannot_claim_internal_address() {
        let mut request = build("/api/files", &[("x-forwarded-for", "10.0.0.1"), ("host", "nas.lan")]);
        let peer: SocketAddr = "203.0.113.9:41000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(access_request_from(&request, true).ip, "203.0.113.9");
    }
}
