use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// IPv4 映射到 IPv6 时的文本前缀
const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// 去掉 `::ffff:` 前缀，返回可用于网段判断的地址文本
pub fn strip_mapped_prefix(ip: &str) -> &str {
    let trimmed = ip.trim();
    match trimmed.get(..IPV4_MAPPED_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(IPV4_MAPPED_PREFIX) => {
            &trimmed[IPV4_MAPPED_PREFIX.len()..]
        }
        _ => trimmed,
    }
}

/// 判断是否为内网地址
///
/// 内网网段：10.0.0.0/8、172.16.0.0/12、192.168.0.0/16、127.0.0.0/8。
/// 无法解析或缺失的地址一律视为外网（失败时收紧，而不是放行）。
pub fn is_private_ip(ip: &str) -> bool {
    let cleaned = strip_mapped_prefix(ip);
    match cleaned.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(is_private_v4).unwrap_or(false),
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    matches!((a, b), (10, _) | (172, 16..=31) | (192, 168) | (127, _))
}

/// 解析客户端 IP
///
/// 只有 `trust_proxy` 开启且 TCP 对端本身是内网或本机地址（即本地反向代理）时，
/// 才依次取 `X-Forwarded-For` 的第一个地址、`X-Real-IP`。
/// 其余情况一律使用 TCP 对端地址，外网客户端无法伪造转发头。
/// 都拿不到时返回空字符串（按外网处理）。
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let peer_ip = peer.map(|addr| addr.ip().to_string()).unwrap_or_default();
    if !trust_proxy || !is_private_ip(&peer_ip) {
        return peer_ip;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer_ip
}
