use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;

/// 单个 IP 的密码失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub ip: String,
    pub failure_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// 最近一次密码错误的时间
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            failure_count: 0,
            locked_until: None,
            last_failure_at: None,
        }
    }

    /// 锁定未生效，且最近一次失败早于 `cutoff`
    pub fn is_stale(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> bool {
        let locked = self.locked_until.is_some_and(|until| now < until);
        let recent = self.last_failure_at.is_some_and(|at| at >= cutoff);
        !locked && !recent
    }
}

/// 失败记录表
///
/// 守卫通过构造函数注入，方便测试时重置，也可以替换成持久化实现。
pub trait AttemptStore: Send + Sync {
    /// 在独占该 IP 记录的前提下执行 `f`
    ///
    /// `f` 拿到当前记录的可变槽位：置为 `None` 即删除，写入 `Some` 即新建或覆盖。
    /// 同一 IP 的并发调用必须串行执行，保证失败计数不会丢失。
    fn with_record<R>(&self, ip: &str, f: impl FnOnce(&mut Option<AttemptRecord>) -> R) -> R;

    /// 读取快照
    fn get(&self, ip: &str) -> Option<AttemptRecord>;

    /// 当前所有记录（用于管理接口）
    fn snapshot(&self) -> Vec<AttemptRecord>;

    fn len(&self) -> usize;

    fn clear(&self);

    /// 删除闲置超过 `max_idle` 且未处于锁定中的记录，返回删除条数
    fn prune_stale(&self, now: DateTime<Utc>, max_idle: Duration) -> usize;
}

/// 基于 DashMap 的内存实现，进程退出即丢失
#[derive(Default)]
pub struct MemoryAttemptStore {
    records: DashMap<String, AttemptRecord>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn with_record<R>(&self, ip: &str, f: impl FnOnce(&mut Option<AttemptRecord>) -> R) -> R {
        // entry 持有分片写锁，直到本次读-改-写结束
        match self.records.entry(ip.to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(occupied.get().clone());
                let result = f(&mut slot);
                match slot {
                    Some(record) => {
                        occupied.insert(record);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(record) = slot {
                    vacant.insert(record);
                }
                result
            }
        }
    }

    fn get(&self, ip: &str) -> Option<AttemptRecord> {
        self.records.get(ip).map(|r| r.value().clone())
    }

    fn snapshot(&self) -> Vec<AttemptRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn clear(&self) {
        self.records.clear();
    }

    fn prune_stale(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let cutoff = now - max_idle;
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_stale(now, cutoff));
        before.saturating_sub(self.records.len())
    }
}
