//! Drainer 模块
//! Drainer module
//!
//! 容量释放后，将暂存作业提升回准入路径：
//! 周期性扫描有积压的租户，也在作业完成释放槽位时被显式触发
//! Promotes parked jobs back onto the admission path as capacity frees:
//! sweeps backlogged tenants periodically, and is triggered explicitly when a
//! completing job releases its slot

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::admission::AdmissionController;
use crate::base::constants::QUEUE_TIMEOUT_TOMBSTONE_TTL;
use crate::base::{EnqueueOptions, Ledger, TenantLimits, WorkerQueue};
use crate::components::ComponentLifecycle;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::job::{DeferredEntry, LimitMode};

/// Drainer - 负责将暂存作业排空到工作者队列
/// Drainer - responsible for draining parked jobs into the worker queue
///
/// 排空按 (priority, enqueue_at) 的顺序消费暂存条目；计数按租户隔离，
/// 任何租户都不会被其他租户饿死
/// Draining consumes parked entries in (priority, enqueue_at) order; counters
/// are per-tenant, so no tenant is starved by another
pub struct Drainer {
  ledger: Arc<dyn Ledger>,
  queue: Arc<dyn WorkerQueue>,
  admission: AdmissionController,
  config: QueueConfig,
  done: Arc<AtomicBool>,
}

impl Drainer {
  /// 创建新的 Drainer
  /// Create a new Drainer
  pub fn new(
    ledger: Arc<dyn Ledger>,
    queue: Arc<dyn WorkerQueue>,
    limits: Arc<dyn TenantLimits>,
    config: QueueConfig,
  ) -> Self {
    let admission = AdmissionController::new(ledger.clone(), limits, config.clone());
    Self {
      ledger,
      queue,
      admission,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动周期性排空
  /// Start the periodic drain
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.drain_interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("Drainer: shutting down");
          break;
        }

        if let Err(e) = self.sweep().await {
          tracing::error!("Drainer sweep error: {}", e);
        }
      }
    })
  }

  /// 扫描所有有积压的租户
  /// Sweep every backlogged tenant
  async fn sweep(&self) -> Result<()> {
    let teams = self.ledger.deferred_teams().await?;
    for team_id in teams {
      if let Err(e) = self.drain_team(&team_id).await {
        tracing::warn!(team_id, error = %e, "drain failed for tenant");
      }
    }
    Ok(())
  }

  /// 作业完成时的释放钩子：归还槽位并排空腾出的容量
  /// Release hook on job completion: return the slots and drain the freed
  /// capacity
  pub async fn release_job(
    &self,
    team_id: &str,
    crawl_id: Option<&str>,
    job_id: &str,
  ) -> Result<usize> {
    self.ledger.remove_active(team_id, job_id).await?;
    if let Some(crawl_id) = crawl_id {
      self.ledger.remove_crawl_active(crawl_id, job_id).await?;
    }
    self.drain_team(team_id).await
  }

  /// 排空单个租户，返回提升的作业数
  /// Drain a single tenant, returning the number of promoted jobs
  pub async fn drain_team(&self, team_id: &str) -> Result<usize> {
    let now = Utc::now();
    self.ledger.clean_expired(team_id, now).await?;

    let ceiling = self.admission.team_ceiling(team_id, LimitMode::Crawl).await;
    let active = self.ledger.count_active(team_id, now).await?;
    let free = (ceiling as u64).saturating_sub(active);
    if free == 0 {
      return Ok(0);
    }

    let entries = self.ledger.pop_deferred(team_id, free as usize).await?;
    let mut promoted = 0;
    for entry in entries {
      // 停放中超时的条目被丢弃，留下墓碑供等待协调器观察
      // An entry past its hold deadline is dropped, leaving a tombstone for
      // the wait coordinator to observe
      if entry.is_expired(now) {
        self
          .ledger
          .mark_queue_timeout(&entry.job.id, QUEUE_TIMEOUT_TOMBSTONE_TTL)
          .await?;
        tracing::debug!(team_id, job_id = %entry.job.id, "deferred job timed out in queue");
        continue;
      }

      // 重新评估爬取门限：条目可能仍被阻塞
      // Re-evaluate the crawl gate: the entry may still be blocked
      let mut crawl_bounded = false;
      if let Some(crawl_id) = &entry.job.crawl_id {
        if let Some(crawl_free) = self.admission.crawl_headroom(crawl_id, now).await? {
          crawl_bounded = true;
          if crawl_free == 0 {
            // 原样放回，enqueue_at 保持不变，排序位置不丢
            // Pushed back verbatim; enqueue_at is unchanged, so its ordering
            // position is kept
            self.ledger.push_deferred(team_id, &entry).await?;
            continue;
          }
        }
      }

      self.promote(team_id, &entry, crawl_bounded).await?;
      promoted += 1;
    }
    Ok(promoted)
  }

  /// 将单个条目提升到准入路径
  /// Promote a single entry onto the admission path
  async fn promote(
    &self,
    team_id: &str,
    entry: &DeferredEntry,
    crawl_bounded: bool,
  ) -> Result<()> {
    self
      .ledger
      .push_active(team_id, &entry.job.id, self.config.active_ttl)
      .await?;
    if crawl_bounded {
      if let Some(crawl_id) = &entry.job.crawl_id {
        self
          .ledger
          .push_crawl_active(crawl_id, &entry.job.id, self.config.active_ttl)
          .await?;
      }
    }

    if let Err(e) = self
      .queue
      .enqueue(
        &entry.job,
        &EnqueueOptions {
          priority: entry.priority,
        },
      )
      .await
    {
      // 队列故障不回滚台账；幻影条目由 TTL 清除
      // A queue failure does not roll back the ledger; the phantom entry is
      // expunged by TTL
      tracing::error!(team_id, job_id = %entry.job.id, error = %e, "enqueue failed during drain");
    }
    Ok(())
  }

  /// 停止 Drainer
  /// Stop the Drainer
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for Drainer {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    Drainer::start(self)
  }

  fn shutdown(&self) {
    Drainer::shutdown(self)
  }

  fn is_done(&self) -> bool {
    Drainer::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::{MemoryLedger, MemoryWorkerQueue, StaticTenantLimits};
  use std::time::Duration;

  fn drainer(limits: StaticTenantLimits) -> (Arc<Drainer>, Arc<MemoryLedger>, Arc<MemoryWorkerQueue>) {
    let ledger = Arc::new(MemoryLedger::new());
    let queue = Arc::new(MemoryWorkerQueue::new());
    let drainer = Arc::new(Drainer::new(
      ledger.clone(),
      queue.clone(),
      Arc::new(limits),
      QueueConfig::default(),
    ));
    (drainer, ledger, queue)
  }

  #[test]
  fn test_drainer_shutdown() {
    let (drainer, _, _) = drainer(StaticTenantLimits::new());
    assert!(!drainer.is_done());
    drainer.shutdown();
    assert!(drainer.is_done());
  }

  #[tokio::test]
  async fn test_drain_respects_headroom() {
    let (drainer, ledger, queue) = drainer(StaticTenantLimits::new().with_ceiling("t", 2));

    for i in 0..4 {
      let job = crate::job::ScrapeJob::single_url("t", format!("https://{i}.example"));
      let entry = crate::job::DeferredEntry::new(
        job,
        crate::job::DispatchOptions::default(),
        Utc::now(),
        None,
      );
      ledger.push_deferred("t", &entry).await.unwrap();
    }

    let promoted = drainer.drain_team("t").await.unwrap();
    assert_eq!(promoted, 2);
    assert_eq!(queue.len().await, 2);
    assert_eq!(ledger.count_deferred("t").await.unwrap(), 2);
    assert_eq!(ledger.count_active("t", Utc::now()).await.unwrap(), 2);

    // 没有空位时不再提升
    // No further promotion without headroom
    let promoted = drainer.drain_team("t").await.unwrap();
    assert_eq!(promoted, 0);
  }

  #[tokio::test]
  async fn test_drain_drops_expired_entries() {
    let (drainer, ledger, queue) = drainer(StaticTenantLimits::new().with_ceiling("t", 5));

    let job = crate::job::ScrapeJob::single_url("t", "https://late.example");
    let job_id = job.id.clone();
    let past = Utc::now() - chrono::Duration::seconds(120);
    let entry = crate::job::DeferredEntry::new(
      job,
      crate::job::DispatchOptions::default(),
      past,
      Some(Duration::from_secs(60)),
    );
    ledger.push_deferred("t", &entry).await.unwrap();

    let promoted = drainer.drain_team("t").await.unwrap();
    assert_eq!(promoted, 0);
    assert_eq!(queue.len().await, 0);
    assert!(ledger.was_queue_timeout(&job_id).await.unwrap());
  }

  #[tokio::test]
  async fn test_drain_pushes_back_blocked_crawl_entries() {
    let (drainer, ledger, queue) = drainer(StaticTenantLimits::new().with_ceiling("t", 5));
    ledger
      .save_crawl_gate(
        "c-1",
        &crate::job::CrawlGate {
          max_concurrency: Some(1),
          delay_seconds: None,
        },
      )
      .await
      .unwrap();
    ledger
      .push_crawl_active("c-1", "running", Duration::from_secs(60))
      .await
      .unwrap();

    let job = crate::job::ScrapeJob::single_url("t", "https://blocked.example").with_crawl("c-1");
    let entry = crate::job::DeferredEntry::new(
      job,
      crate::job::DispatchOptions::default(),
      Utc::now(),
      None,
    );
    ledger.push_deferred("t", &entry).await.unwrap();

    let promoted = drainer.drain_team("t").await.unwrap();
    assert_eq!(promoted, 0);
    assert_eq!(queue.len().await, 0);
    // 被阻塞的条目留在等待区
    // The blocked entry stays in the holding area
    assert_eq!(ledger.count_deferred("t").await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_release_job_drains_freed_capacity() {
    let (drainer, ledger, queue) = drainer(StaticTenantLimits::new().with_ceiling("t", 1));

    ledger
      .push_active("t", "running", Duration::from_secs(60))
      .await
      .unwrap();
    let job = crate::job::ScrapeJob::single_url("t", "https://waiting.example");
    let entry = crate::job::DeferredEntry::new(
      job,
      crate::job::DispatchOptions::default(),
      Utc::now(),
      None,
    );
    ledger.push_deferred("t", &entry).await.unwrap();

    // 槽位被占时不提升
    // No promotion while the slot is taken
    assert_eq!(drainer.drain_team("t").await.unwrap(), 0);

    // 完成释放后立即提升
    // Promotion happens right after the completion release
    let promoted = drainer.release_job("t", None, "running").await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(queue.len().await, 1);
    assert_eq!(ledger.count_deferred("t").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_drain_priority_order() {
    let (drainer, ledger, queue) = drainer(StaticTenantLimits::new().with_ceiling("t", 1));

    let low = crate::job::ScrapeJob::single_url("t", "https://low.example").with_priority(20);
    let urgent = crate::job::ScrapeJob::single_url("t", "https://urgent.example").with_priority(1);
    for job in [low, urgent] {
      let entry = crate::job::DeferredEntry::new(
        job,
        crate::job::DispatchOptions::default(),
        Utc::now(),
        None,
      );
      ledger.push_deferred("t", &entry).await.unwrap();
    }

    drainer.drain_team("t").await.unwrap();
    assert_eq!(queue.len().await, 1);
    // 紧急作业先被提升
    // The urgent job is promoted first
    let urgent_promoted = ledger.count_deferred("t").await.unwrap() == 1
      && ledger
        .pop_deferred("t", 1)
        .await
        .unwrap()
        .first()
        .map(|e| e.job.payload.url == "https://low.example")
        .unwrap_or(false);
    assert!(urgent_promoted);
  }
}
