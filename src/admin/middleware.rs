use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(|v4| v4.is_loopback())
            .unwrap_or_else(|| v6.is_loopback()),
    }
}

/// 中间件：只允许 localhost 访问
///
/// 只看 TCP 对端地址，不信任任何转发头。
pub async fn localhost_only(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_loopback(addr.ip()) {
        tracing::warn!("拒绝非 localhost 的管理请求，来源: {}", addr);
        return Err(AppError::Forbidden(
            "Admin API only accessible from localhost".to_string(),
        ));
    }

    tracing::debug!("允许来自 localhost 的管理请求: {}", addr);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback("127.0.0.1".parse().unwrap()));
        assert!(is_loopback("::1".parse().unwrap()));
        assert!(is_loopback("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_loopback("192.168.1.2".parse().unwrap()));
        assert!(!is_loopback("::ffff:10.0.0.1".parse().unwrap()));
    }
}
