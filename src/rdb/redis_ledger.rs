//! Redis 台账实现
//! Redis ledger implementation
//!
//! 活跃集合为 score 即过期时间的有序集合；暂存区为排序有序集合加载荷哈希；
//! 通知窗口用 SET NX PX 原子认领
//! Active sets are sorted sets whose scores are expiry timestamps; the holding
//! area is an ordering sorted set plus a payload hash; notification windows
//! are claimed atomically with SET NX PX

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::base::constants::{CRAWL_GATE_TTL, DEFERRED_KEY_TTL};
use crate::base::keys;
use crate::base::Ledger;
use crate::error::Result;
use crate::job::{CrawlGate, DeferredEntry};
use crate::rdb::redis_scripts::{RedisArg, ScriptManager};
use crate::redis::RedisConnectionType;

/// Redis 台账
/// Redis ledger
pub struct RedisLedger {
  connection: MultiplexedConnection,
  scripts: ScriptManager,
}

impl RedisLedger {
  /// 创建新的 Redis 台账实例并预加载脚本
  /// Create a new Redis ledger instance and preload its scripts
  pub async fn new(connection_type: RedisConnectionType) -> Result<Self> {
    let mut connection = connection_type.connect().await?;
    let mut scripts = ScriptManager::default();
    scripts.load_scripts(&mut connection).await?;
    Ok(Self {
      connection,
      scripts,
    })
  }

  /// 活跃集合的整键回收 TTL：条目 TTL 加一分钟余量
  /// Whole-key GC TTL of an active set: the entry TTL plus a minute of slack
  fn active_key_ttl_ms(ttl: Duration) -> i64 {
    ttl.as_millis() as i64 + 60_000
  }

  async fn push_active_at(&self, key: String, job_id: &str, ttl: Duration) -> Result<()> {
    let mut conn = self.connection.clone();
    let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    let _: () = self
      .scripts
      .eval_script(
        &mut conn,
        "push_active",
        &[key],
        &[
          RedisArg::Int(expires_at),
          RedisArg::Str(job_id.to_string()),
          RedisArg::Int(Self::active_key_ttl_ms(ttl)),
        ],
      )
      .await?;
    Ok(())
  }

  async fn count_active_at(&self, key: String, now: DateTime<Utc>) -> Result<u64> {
    let mut conn = self.connection.clone();
    // 只统计 expires_at > now 的成员
    // Only count members with expires_at > now
    let count: u64 = redis::cmd("ZCOUNT")
      .arg(key)
      .arg(format!("({}", now.timestamp_millis()))
      .arg("+inf")
      .query_async(&mut conn)
      .await?;
    Ok(count)
  }
}

#[async_trait]
impl Ledger for RedisLedger {
  async fn ping(&self) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }

  async fn push_active(&self, team_id: &str, job_id: &str, ttl: Duration) -> Result<()> {
    self
      .push_active_at(keys::active_key(team_id), job_id, ttl)
      .await
  }

  async fn push_crawl_active(&self, crawl_id: &str, job_id: &str, ttl: Duration) -> Result<()> {
    self
      .push_active_at(keys::crawl_active_key(crawl_id), job_id, ttl)
      .await
  }

  async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u64> {
    self.count_active_at(keys::active_key(team_id), now).await
  }

  async fn count_crawl_active(&self, crawl_id: &str, now: DateTime<Utc>) -> Result<u64> {
    self
      .count_active_at(keys::crawl_active_key(crawl_id), now)
      .await
  }

  async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("ZREMRANGEBYSCORE")
      .arg(keys::active_key(team_id))
      .arg("-inf")
      .arg(now.timestamp_millis())
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn remove_active(&self, team_id: &str, job_id: &str) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("ZREM")
      .arg(keys::active_key(team_id))
      .arg(job_id)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn remove_crawl_active(&self, crawl_id: &str, job_id: &str) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("ZREM")
      .arg(keys::crawl_active_key(crawl_id))
      .arg(job_id)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn push_deferred(&self, team_id: &str, entry: &DeferredEntry) -> Result<()> {
    let mut conn = self.connection.clone();
    let score = keys::deferred_score(entry.priority, entry.enqueue_at);
    let data = serde_json::to_string(entry)?;
    let _: () = self
      .scripts
      .eval_script(
        &mut conn,
        "push_deferred",
        &[
          keys::deferred_key(team_id),
          keys::deferred_data_key(team_id),
          keys::DEFERRED_TEAMS.to_string(),
        ],
        &[
          RedisArg::Float(score),
          RedisArg::Str(entry.job.id.clone()),
          RedisArg::Str(data),
          RedisArg::Str(team_id.to_string()),
          RedisArg::Int(DEFERRED_KEY_TTL.as_millis() as i64),
        ],
      )
      .await?;
    Ok(())
  }

  async fn count_deferred(&self, team_id: &str) -> Result<u64> {
    let mut conn = self.connection.clone();
    let count: u64 = redis::cmd("ZCARD")
      .arg(keys::deferred_key(team_id))
      .query_async(&mut conn)
      .await?;
    Ok(count)
  }

  async fn pop_deferred(&self, team_id: &str, n: usize) -> Result<Vec<DeferredEntry>> {
    if n == 0 {
      return Ok(Vec::new());
    }
    let mut conn = self.connection.clone();
    let raw: Vec<String> = self
      .scripts
      .eval_script(
        &mut conn,
        "pop_deferred",
        &[
          keys::deferred_key(team_id),
          keys::deferred_data_key(team_id),
          keys::DEFERRED_TEAMS.to_string(),
        ],
        &[
          RedisArg::Int(n as i64),
          RedisArg::Str(team_id.to_string()),
        ],
      )
      .await?;

    let mut entries = Vec::with_capacity(raw.len());
    for data in raw {
      match serde_json::from_str::<DeferredEntry>(&data) {
        Ok(entry) => entries.push(entry),
        // 无法解析的条目已经被弹出；丢弃并记录，不能让它阻塞排空
        // An unparsable entry has already been popped; drop it with a log
        // rather than letting it block the drain
        Err(e) => tracing::error!(team_id, error = %e, "dropping undecodable deferred entry"),
      }
    }
    Ok(entries)
  }

  async fn deferred_teams(&self) -> Result<Vec<String>> {
    let mut conn = self.connection.clone();
    let teams: Vec<String> = redis::cmd("SMEMBERS")
      .arg(keys::DEFERRED_TEAMS)
      .query_async(&mut conn)
      .await?;
    Ok(teams)
  }

  async fn save_crawl_gate(&self, crawl_id: &str, gate: &CrawlGate) -> Result<()> {
    let mut conn = self.connection.clone();
    let data = serde_json::to_string(gate)?;
    let _: () = redis::cmd("SET")
      .arg(keys::crawl_gate_key(crawl_id))
      .arg(data)
      .arg("PX")
      .arg(CRAWL_GATE_TTL.as_millis() as i64)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn crawl_gate(&self, crawl_id: &str) -> Result<Option<CrawlGate>> {
    let mut conn = self.connection.clone();
    let raw: Option<String> = redis::cmd("GET")
      .arg(keys::crawl_gate_key(crawl_id))
      .query_async(&mut conn)
      .await?;
    match raw {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }

  async fn try_claim_notification(
    &self,
    team_id: &str,
    kind: &str,
    interval: Duration,
  ) -> Result<bool> {
    let mut conn = self.connection.clone();
    // SET NX PX：窗口内只有第一个认领者拿到 OK
    // SET NX PX: only the first claimant within the window gets OK
    let claimed: Option<String> = redis::cmd("SET")
      .arg(keys::notified_key(team_id, kind))
      .arg(Utc::now().timestamp_millis())
      .arg("NX")
      .arg("PX")
      .arg(interval.as_millis() as i64)
      .query_async(&mut conn)
      .await?;
    Ok(claimed.is_some())
  }

  async fn mark_queue_timeout(&self, job_id: &str, ttl: Duration) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("SET")
      .arg(keys::queue_timeout_key(job_id))
      .arg(1)
      .arg("PX")
      .arg(ttl.as_millis() as i64)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn was_queue_timeout(&self, job_id: &str) -> Result<bool> {
    let mut conn = self.connection.clone();
    let exists: bool = redis::cmd("EXISTS")
      .arg(keys::queue_timeout_key(job_id))
      .query_async(&mut conn)
      .await?;
    Ok(exists)
  }
}
