//! 内存台账实现
//! Memory ledger implementation
//!
//! 使用内存数据结构实现并发台账，不依赖任何外部服务；
//! 语义与 Redis 实现一致，供测试与本地运行使用
//! Implements the concurrency ledger with in-memory data structures and no
//! external service dependencies; semantics match the Redis implementation,
//! for tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::base::Ledger;
use crate::error::Result;
use crate::job::{CrawlGate, DeferredEntry};

/// 暂存条目的排序键：(priority, enqueue_at, seq)
/// Ordering key of a deferred entry: (priority, enqueue_at, seq)
type DeferredKey = (i32, i64, u64);

/// 单个租户的台账数据
/// Ledger data of a single tenant
#[derive(Default)]
struct TeamData {
  /// 活跃作业及其过期时间（毫秒）
  /// Active jobs with their expiry in ms
  active: HashMap<String, i64>,
  /// 按序排列的暂存作业 ID
  /// Deferred job IDs in order
  deferred: BTreeMap<DeferredKey, String>,
  /// 暂存作业载荷
  /// Deferred job payloads
  deferred_data: HashMap<String, DeferredEntry>,
  /// 作业 ID 到排序键的反向索引，用于替换语义
  /// Reverse index from job ID to ordering key, for replace semantics
  deferred_index: HashMap<String, DeferredKey>,
  /// 各类通知窗口的认领截止时间（毫秒）
  /// Claim expiry of each notification window in ms
  notified: HashMap<String, i64>,
}

/// 内存存储
/// Memory storage
#[derive(Default)]
struct MemoryStorage {
  /// 每个租户的数据
  /// Data for each tenant
  teams: HashMap<String, TeamData>,
  /// 每个爬取的活跃作业及过期时间
  /// Active jobs per crawl with expiries
  crawl_active: HashMap<String, HashMap<String, i64>>,
  /// 爬取门限记录
  /// Crawl gate records
  crawl_gates: HashMap<String, CrawlGate>,
  /// 队列中超时墓碑及其过期时间
  /// Timed-out-in-queue tombstones with expiries
  queue_timeouts: HashMap<String, i64>,
  /// 单调序号，打破同毫秒入队的平局
  /// Monotonic sequence breaking same-millisecond enqueue ties
  seq: u64,
}

impl MemoryStorage {
  fn team_mut(&mut self, team_id: &str) -> &mut TeamData {
    self.teams.entry(team_id.to_string()).or_default()
  }
}

/// 内存台账
/// Memory ledger
pub struct MemoryLedger {
  storage: Arc<RwLock<MemoryStorage>>,
}

impl Default for MemoryLedger {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryLedger {
  /// 创建新的内存台账实例
  /// Create a new memory ledger instance
  pub fn new() -> Self {
    Self {
      storage: Arc::new(RwLock::new(MemoryStorage::default())),
    }
  }
}

#[async_trait]
impl Ledger for MemoryLedger {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn push_active(&self, team_id: &str, job_id: &str, ttl: Duration) -> Result<()> {
    let mut storage = self.storage.write().await;
    let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    storage
      .team_mut(team_id)
      .active
      .insert(job_id.to_string(), expires_at);
    Ok(())
  }

  async fn push_crawl_active(&self, crawl_id: &str, job_id: &str, ttl: Duration) -> Result<()> {
    let mut storage = self.storage.write().await;
    let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    storage
      .crawl_active
      .entry(crawl_id.to_string())
      .or_default()
      .insert(job_id.to_string(), expires_at);
    Ok(())
  }

  async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u64> {
    let storage = self.storage.read().await;
    let now_ms = now.timestamp_millis();
    let count = storage
      .teams
      .get(team_id)
      .map(|team| team.active.values().filter(|e| **e > now_ms).count())
      .unwrap_or(0);
    Ok(count as u64)
  }

  async fn count_crawl_active(&self, crawl_id: &str, now: DateTime<Utc>) -> Result<u64> {
    let storage = self.storage.read().await;
    let now_ms = now.timestamp_millis();
    let count = storage
      .crawl_active
      .get(crawl_id)
      .map(|jobs| jobs.values().filter(|e| **e > now_ms).count())
      .unwrap_or(0);
    Ok(count as u64)
  }

  async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<()> {
    let mut storage = self.storage.write().await;
    let now_ms = now.timestamp_millis();
    if let Some(team) = storage.teams.get_mut(team_id) {
      team.active.retain(|_, expires_at| *expires_at > now_ms);
    }
    Ok(())
  }

  async fn remove_active(&self, team_id: &str, job_id: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(team) = storage.teams.get_mut(team_id) {
      team.active.remove(job_id);
    }
    Ok(())
  }

  async fn remove_crawl_active(&self, crawl_id: &str, job_id: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(jobs) = storage.crawl_active.get_mut(crawl_id) {
      jobs.remove(job_id);
    }
    Ok(())
  }

  async fn push_deferred(&self, team_id: &str, entry: &DeferredEntry) -> Result<()> {
    let mut storage = self.storage.write().await;
    let seq = storage.seq;
    storage.seq += 1;

    let team = storage.team_mut(team_id);
    // 重复暂存替换旧条目
    // Re-parking replaces the prior entry
    if let Some(old_key) = team.deferred_index.remove(&entry.job.id) {
      team.deferred.remove(&old_key);
    }
    let key = (entry.priority, entry.enqueue_at, seq);
    team.deferred.insert(key, entry.job.id.clone());
    team.deferred_index.insert(entry.job.id.clone(), key);
    team.deferred_data.insert(entry.job.id.clone(), entry.clone());
    Ok(())
  }

  async fn count_deferred(&self, team_id: &str) -> Result<u64> {
    let storage = self.storage.read().await;
    let count = storage
      .teams
      .get(team_id)
      .map(|team| team.deferred.len())
      .unwrap_or(0);
    Ok(count as u64)
  }

  async fn pop_deferred(&self, team_id: &str, n: usize) -> Result<Vec<DeferredEntry>> {
    if n == 0 {
      return Ok(Vec::new());
    }
    let mut storage = self.storage.write().await;
    let Some(team) = storage.teams.get_mut(team_id) else {
      return Ok(Vec::new());
    };

    let keys: Vec<DeferredKey> = team.deferred.keys().take(n).copied().collect();
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
      if let Some(job_id) = team.deferred.remove(&key) {
        team.deferred_index.remove(&job_id);
        if let Some(entry) = team.deferred_data.remove(&job_id) {
          entries.push(entry);
        }
      }
    }
    Ok(entries)
  }

  async fn deferred_teams(&self) -> Result<Vec<String>> {
    let storage = self.storage.read().await;
    let teams = storage
      .teams
      .iter()
      .filter(|(_, team)| !team.deferred.is_empty())
      .map(|(team_id, _)| team_id.clone())
      .collect();
    Ok(teams)
  }

  async fn save_crawl_gate(&self, crawl_id: &str, gate: &CrawlGate) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage
      .crawl_gates
      .insert(crawl_id.to_string(), gate.clone());
    Ok(())
  }

  async fn crawl_gate(&self, crawl_id: &str) -> Result<Option<CrawlGate>> {
    let storage = self.storage.read().await;
    Ok(storage.crawl_gates.get(crawl_id).cloned())
  }

  async fn try_claim_notification(
    &self,
    team_id: &str,
    kind: &str,
    interval: Duration,
  ) -> Result<bool> {
    let mut storage = self.storage.write().await;
    let now_ms = Utc::now().timestamp_millis();
    let team = storage.team_mut(team_id);
    if let Some(claim_expires) = team.notified.get(kind) {
      if *claim_expires > now_ms {
        return Ok(false);
      }
    }
    team
      .notified
      .insert(kind.to_string(), now_ms + interval.as_millis() as i64);
    Ok(true)
  }

  async fn mark_queue_timeout(&self, job_id: &str, ttl: Duration) -> Result<()> {
    let mut storage = self.storage.write().await;
    let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    storage
      .queue_timeouts
      .insert(job_id.to_string(), expires_at);
    Ok(())
  }

  async fn was_queue_timeout(&self, job_id: &str) -> Result<bool> {
    let storage = self.storage.read().await;
    let now_ms = Utc::now().timestamp_millis();
    Ok(
      storage
        .queue_timeouts
        .get(job_id)
        .is_some_and(|expires_at| *expires_at > now_ms),
    )
  }
}
