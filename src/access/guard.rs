use super::network::is_private_ip;
use super::store::{AttemptRecord, AttemptStore, MemoryAttemptStore};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

/// 固定的安全参数：最大失败次数
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// 固定的安全参数：锁定时长 24 小时
pub const LOCKOUT_DURATION_HOURS: i64 = 24;

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// 守卫策略（启动时确定，之后只读）
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub password: String,
    pub allowed_hosts: Vec<String>,
    pub max_failed_attempts: u32,
    pub lockout_duration: Duration,
}

impl GuardPolicy {
    pub fn new(password: String, allowed_hosts: Vec<String>) -> Self {
        Self {
            password,
            allowed_hosts,
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_duration: Duration::hours(LOCKOUT_DURATION_HOURS),
        }
    }

    fn is_allow_listed(&self, host: &str, ip: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| host.contains(allowed.as_str()) || ip.contains(allowed.as_str()))
    }
}

/// 守卫的输入
#[derive(Debug, Clone, Default)]
pub struct AccessRequest {
    /// 客户端 IP（可能带 `::ffff:` 前缀，可能为空）
    pub ip: String,
    /// Host 请求头
    pub host: String,
    /// 请求头 `x-access-password` 或查询参数 `password`
    pub password: Option<String>,
}

/// 需要密码的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordReason {
    ExternalAccess,
    Required,
}

impl PasswordReason {
    pub fn message(self) -> &'static str {
        match self {
            PasswordReason::ExternalAccess => "外网访问必须提供密码",
            PasswordReason::Required => "需要密码才能访问",
        }
    }
}

/// 守卫的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    PasswordRequired {
        reason: PasswordReason,
        is_external: bool,
    },
    Locked {
        remaining_hours: i64,
    },
    PasswordRejected {
        remaining_attempts: u32,
    },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    /// 指标标签
    pub fn outcome(&self) -> &'static str {
        match self {
            AccessDecision::Allow => "allow",
            AccessDecision::PasswordRequired { .. } => "password_required",
            AccessDecision::Locked { .. } => "locked",
            AccessDecision::PasswordRejected { .. } => "password_rejected",
        }
    }

    /// 拒绝时返回给浏览器的 JSON；放行时为 `None`
    pub fn denial_body(&self) -> Option<Value> {
        match self {
            AccessDecision::Allow => None,
            AccessDecision::PasswordRequired { reason, is_external } => Some(json!({
                "requiresPassword": true,
                "message": reason.message(),
                "isExternalAccess": is_external,
            })),
            AccessDecision::Locked { remaining_hours } => Some(json!({
                "requiresPassword": true,
                "message": format!("密码错误次数过多，账户已被锁定。剩余时间：{}小时", remaining_hours),
                "locked": true,
                "remainingHours": remaining_hours,
            })),
            AccessDecision::PasswordRejected { remaining_attempts } => Some(json!({
                "requiresPassword": true,
                "message": format!("密码错误，剩余尝试次数：{}", remaining_attempts),
                "remainingAttempts": remaining_attempts,
            })),
        }
    }
}

/// 对失败记录表的修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Unchanged,
    Remove,
    Put(AttemptRecord),
}

/// 一次判定的完整结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: AccessDecision,
    pub change: RecordChange,
    /// 本次判定刚刚施加了锁定
    pub lock_imposed: bool,
    /// 本次判定发现锁定已过期
    pub lock_expired: bool,
    /// 内网白名单直接放行，没有读取失败记录
    pub bypassed: bool,
}

impl Verdict {
    fn new(decision: AccessDecision, change: RecordChange) -> Self {
        Self {
            decision,
            change,
            lock_imposed: false,
            lock_expired: false,
            bypassed: false,
        }
    }
}

fn ceil_hours(span: Duration) -> i64 {
    let millis = span.num_milliseconds().max(0);
    (millis + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR
}

/// 纯判定函数：(策略, 请求, 记录快照, 当前时间) -> (判定, 记录修改)
///
/// 不做任何 IO，也不触碰共享状态，调用方负责在独占该 IP 记录时应用 `change`。
pub fn decide(
    policy: &GuardPolicy,
    request: &AccessRequest,
    record: Option<&AttemptRecord>,
    now: DateTime<Utc>,
) -> Verdict {
    // 1. 网络分类
    let is_external = !is_private_ip(&request.ip);

    // 2. 内网白名单直接放行（外网永远不走这条路）
    if !is_external && policy.is_allow_listed(&request.host, &request.ip) {
        let mut verdict = Verdict::new(AccessDecision::Allow, RecordChange::Unchanged);
        verdict.bypassed = true;
        return verdict;
    }

    // 3. 锁定检查
    let mut lock_expired = false;
    let mut current = record.cloned();
    if let Some(locked_until) = current.as_ref().and_then(|r| r.locked_until) {
        if now < locked_until {
            return Verdict::new(
                AccessDecision::Locked {
                    remaining_hours: ceil_hours(locked_until - now),
                },
                RecordChange::Unchanged,
            );
        }
        current = None;
        lock_expired = true;
    }
    let expired_change = if lock_expired {
        RecordChange::Remove
    } else {
        RecordChange::Unchanged
    };

    // 4. 是否提供了密码
    let password = match request.password.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ => {
            let reason = if is_external {
                PasswordReason::ExternalAccess
            } else {
                PasswordReason::Required
            };
            let mut verdict = Verdict::new(
                AccessDecision::PasswordRequired { reason, is_external },
                expired_change,
            );
            verdict.lock_expired = lock_expired;
            return verdict;
        }
    };

    // 5. 比对密码
    if password == policy.password {
        let change = if current.is_some() || lock_expired {
            RecordChange::Remove
        } else {
            RecordChange::Unchanged
        };
        let mut verdict = Verdict::new(AccessDecision::Allow, change);
        verdict.lock_expired = lock_expired;
        return verdict;
    }

    let mut next = current.unwrap_or_else(|| AttemptRecord::new(&request.ip));
    next.failure_count += 1;
    next.last_failure_at = Some(now);

    let mut verdict = if next.failure_count >= policy.max_failed_attempts {
        next.locked_until = Some(now + policy.lockout_duration);
        let mut verdict = Verdict::new(
            AccessDecision::Locked {
                remaining_hours: ceil_hours(policy.lockout_duration),
            },
            RecordChange::Put(next),
        );
        verdict.lock_imposed = true;
        verdict
    } else {
        let remaining_attempts = policy.max_failed_attempts - next.failure_count;
        Verdict::new(
            AccessDecision::PasswordRejected { remaining_attempts },
            RecordChange::Put(next),
        )
    };
    verdict.lock_expired = lock_expired;
    verdict
}

/// 访问守卫：策略 + 注入的失败记录表
pub struct AccessGuard<S: AttemptStore = MemoryAttemptStore> {
    policy: GuardPolicy,
    store: S,
}

impl AccessGuard<MemoryAttemptStore> {
    pub fn in_memory(policy: GuardPolicy) -> Self {
        Self::new(policy, MemoryAttemptStore::new())
    }
}

impl<S: AttemptStore> AccessGuard<S> {
    pub fn new(policy: GuardPolicy, store: S) -> Self {
        Self { policy, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 判定一次请求
    ///
    /// 整个"读取-判定-修改"过程都在该 IP 记录的独占区内完成，同一 IP 的并发请求被串行化。
    pub fn evaluate(&self, request: &AccessRequest, now: DateTime<Utc>) -> Verdict {
        let verdict = self.store.with_record(&request.ip, |slot| {
            let verdict = decide(&self.policy, request, slot.as_ref(), now);
            match &verdict.change {
                RecordChange::Unchanged => {}
                RecordChange::Remove => *slot = None,
                RecordChange::Put(record) => *slot = Some(record.clone()),
            }
            verdict
        });

        if verdict.bypassed {
            tracing::debug!("内网白名单放行: ip={}, host={}", request.ip, request.host);
            return verdict;
        }
        if verdict.lock_expired {
            tracing::info!("IP {} 的锁定已过期，清除失败记录", request.ip);
        }
        if verdict.lock_imposed {
            tracing::warn!(
                "IP {} 密码错误次数达到 {} 次，锁定 {} 小时",
                request.ip,
                self.policy.max_failed_attempts,
                self.policy.lockout_duration.num_hours()
            );
        }
        match &verdict.decision {
            AccessDecision::Allow => {
                if verdict.change == RecordChange::Remove {
                    tracing::info!("IP {} 密码验证成功，清除失败记录", request.ip);
                }
            }
            AccessDecision::PasswordRequired { is_external, .. } => {
                tracing::debug!("IP {} 未提供密码 (外网: {})", request.ip, is_external);
            }
            AccessDecision::Locked { remaining_hours } => {
                tracing::warn!("拒绝已锁定的 IP {}，剩余 {} 小时", request.ip, remaining_hours);
            }
            AccessDecision::PasswordRejected { remaining_attempts } => {
                tracing::warn!("IP {} 密码错误，剩余尝试次数 {}", request.ip, remaining_attempts);
            }
        }

        verdict
    }

    /// 清理闲置的失败记录
    ///
    /// 只删除未锁定且最近一次失败早于一个锁定周期的记录。
    pub fn prune_stale(&self, now: DateTime<Utc>) -> usize {
        self.store.prune_stale(now, self.policy.lockout_duration)
    }
}

/// 后台任务：每小时清理一次闲置的失败记录
pub async fn attempt_prune_task<S: AttemptStore + 'static>(guard: std::sync::Arc<AccessGuard<S>>) {
    use tokio::time::{interval, Duration as TickDuration};

    let mut interval = interval(TickDuration::from_secs(3600));
    loop {
        interval.tick().await;
        let removed = guard.prune_stale(Utc::now());
        if removed > 0 {
            tracing::info!("清理了 {} 条闲置的失败记录", removed);
        }
    }
}
