//! 派发器模块
//! Dispatcher module
//!
//! 提供单作业与批量的提交入口：准入的作业进入外部工作者队列，
//! 被暂存的作业写入台账的等待区
//! Provides the single and bulk submission entry points: admitted jobs enter
//! the external worker queue, parked jobs go into the ledger's holding area

use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::admission::{AdmissionController, Verdict};
use crate::base::{
  EnqueueOptions, JobHandle, Ledger, NotificationChannel, RequestMirror, TenantLimits, WorkerQueue,
};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::job::{DeferredEntry, DispatchOptions, ScrapeJob};
use crate::notify::{NotificationGate, NotificationKind};

/// 派发器的依赖上下文
/// Dependency context of the dispatcher
///
/// 所有环境可变状态都显式注入，不使用进程级单例
/// All ambient mutable state is injected explicitly; no process-level
/// singletons
pub struct DispatcherContext {
  /// 并发台账
  /// Concurrency ledger
  pub ledger: Arc<dyn Ledger>,
  /// 外部工作者队列
  /// External worker queue
  pub queue: Arc<dyn WorkerQueue>,
  /// 租户限额来源
  /// Tenant limit source
  pub limits: Arc<dyn TenantLimits>,
  /// 通知通道
  /// Notification channel
  pub notifications: Arc<dyn NotificationChannel>,
  /// 可选的请求镜像
  /// Optional request mirror
  pub mirror: Option<Arc<dyn RequestMirror>>,
}

/// 派发器
/// Dispatcher
pub struct Dispatcher {
  ledger: Arc<dyn Ledger>,
  queue: Arc<dyn WorkerQueue>,
  admission: AdmissionController,
  gate: NotificationGate,
  mirror: Option<Arc<dyn RequestMirror>>,
  config: QueueConfig,
}

impl Dispatcher {
  /// 创建新的派发器
  /// Create a new dispatcher
  pub fn new(context: DispatcherContext, config: QueueConfig) -> Self {
    let admission = AdmissionController::new(
      context.ledger.clone(),
      context.limits.clone(),
      config.clone(),
    );
    let gate = NotificationGate::new(
      context.ledger.clone(),
      context.notifications,
      config.notify_interval,
    );
    Self {
      ledger: context.ledger,
      queue: context.queue,
      admission,
      gate,
      mirror: context.mirror,
      config,
    }
  }

  /// 准入控制器
  /// The admission controller
  pub fn admission(&self) -> &AdmissionController {
    &self.admission
  }

  /// 提交单个作业
  /// Submit a single job
  ///
  /// 准入时返回工作者队列句柄；被暂存时返回 None
  /// Returns the worker queue handle on admission, None when parked
  pub async fn submit_one(
    &self,
    job: ScrapeJob,
    opts: DispatchOptions,
  ) -> Result<Option<JobHandle>> {
    let admission = self.admission.admit_one(&job, &opts).await?;
    match admission.verdict {
      Verdict::Admit => {
        let handle = self.admit(&job, admission.crawl_bounded).await?;
        Ok(Some(handle))
      }
      Verdict::DeferTenant | Verdict::DeferCrawl => {
        self.defer(job, opts).await?;
        Ok(None)
      }
    }
  }

  /// 批量提交作业
  /// Submit jobs in bulk
  ///
  /// 无论调用方如何组织批次，都会按租户重新分片
  /// Repartitions by tenant regardless of how the caller organized the batch
  pub async fn submit_many(&self, jobs: Vec<ScrapeJob>) -> Result<()> {
    // 按租户分片，保持首次出现的顺序
    // Partition by tenant, keeping first-appearance order
    let mut partitions: Vec<(String, Vec<ScrapeJob>)> = Vec::new();
    for job in jobs {
      match partitions.iter_mut().find(|(team, _)| *team == job.team_id) {
        Some((_, bucket)) => bucket.push(job),
        None => partitions.push((job.team_id.clone(), vec![job])),
      }
    }

    for (team_id, team_jobs) in partitions {
      self.submit_team_batch(&team_id, team_jobs).await?;
    }
    Ok(())
  }

  async fn submit_team_batch(&self, team_id: &str, jobs: Vec<ScrapeJob>) -> Result<()> {
    let plan = self.admission.plan_bulk(team_id, &jobs).await?;

    for planned in &plan.admit {
      let job = &jobs[planned.index];
      // 批量路径下队列故障只记录；台账条目经由 TTL 自愈
      // On the bulk path a queue failure is only logged; ledger entries
      // self-heal via TTL
      if let Err(e) = self.admit(job, planned.crawl_bounded).await {
        if matches!(e, Error::WorkerQueueUnavailable { .. }) {
          tracing::error!(team_id, job_id = %job.id, error = %e, "bulk enqueue failed");
        } else {
          return Err(e);
        }
      }
    }

    for &index in plan.defer_tenant.iter().chain(plan.defer_crawl.iter()) {
      self
        .park(jobs[index].clone(), DispatchOptions::default())
        .await?;
    }

    if plan.notify {
      self
        .gate
        .maybe_notify(
          team_id,
          NotificationKind::ConcurrencyLimitReached,
          plan.suppress_notification,
        )
        .await;
    }
    Ok(())
  }

  /// 准入路径：登记活跃槽位并入队
  /// Admission path: register active slots and enqueue
  async fn admit(&self, job: &ScrapeJob, crawl_bounded: bool) -> Result<JobHandle> {
    self
      .ledger
      .push_active(&job.team_id, &job.id, self.config.active_ttl)
      .await?;
    if crawl_bounded {
      if let Some(crawl_id) = &job.crawl_id {
        self
          .ledger
          .push_crawl_active(crawl_id, &job.id, self.config.active_ttl)
          .await?;
      }
    }

    self.maybe_mirror(job);

    match self
      .queue
      .enqueue(
        job,
        &EnqueueOptions {
          priority: job.priority,
        },
      )
      .await
    {
      Ok(handle) => Ok(handle),
      Err(e) => {
        // 活跃条目不回滚，60 秒内由 TTL 清除幻影
        // Active entries are not rolled back; the TTL expunges the phantom
        // within 60 seconds
        tracing::error!(team_id = %job.team_id, job_id = %job.id, error = %e, "enqueue failed after ledger writes");
        Err(Error::worker_queue(e.to_string()))
      }
    }
  }

  /// 暂存路径：写入等待区，即席作业附加积压通知检查
  /// Deferral path: write to the holding area, with a backlog notification
  /// check for ad-hoc jobs
  async fn defer(&self, job: ScrapeJob, opts: DispatchOptions) -> Result<()> {
    let is_adhoc = job.crawl_id.is_none();
    let team_id = job.team_id.clone();
    let limit_mode = job.limit_mode();
    self.park(job, opts).await?;

    if is_adhoc {
      let ceiling = self.admission.team_ceiling(&team_id, limit_mode).await;
      // 积压检查失败不影响已经成功的暂存
      // A failed backlog check does not affect the already successful park
      match self.ledger.count_deferred(&team_id).await {
        Ok(backlog) if backlog > 2 * ceiling as u64 => {
          self
            .gate
            .maybe_notify(&team_id, NotificationKind::ConcurrencyLimitReached, false)
            .await;
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(team_id = %team_id, error = %e, "deferred backlog check failed"),
      }
    }
    Ok(())
  }

  /// 将作业写入台账的等待区
  /// Write a job into the ledger's holding area
  ///
  /// 即席作业的停放以抓取超时为限；爬取作业无限期停放，直到被排空
  /// An ad-hoc job's hold is bounded by the scrape timeout; a crawl job parks
  /// indefinitely until drained
  async fn park(&self, job: ScrapeJob, mut opts: DispatchOptions) -> Result<()> {
    opts.was_deferred = true;
    let hold = if job.crawl_id.is_none() {
      Some(job.scrape_timeout())
    } else {
      None
    };
    let team_id = job.team_id.clone();
    let entry = DeferredEntry::new(job, opts, Utc::now(), hold);
    self.ledger.push_deferred(&team_id, &entry).await?;
    tracing::debug!(team_id = %team_id, job_id = %entry.job.id, "job parked in holding area");
    Ok(())
  }

  /// 可能镜像一次提交；从不等待，失败从不影响准入
  /// Possibly mirror a submission; never awaited, failures never affect
  /// admission
  fn maybe_mirror(&self, job: &ScrapeJob) {
    let Some(mirror) = &self.mirror else {
      return;
    };
    if self.config.mirror_rate <= 0.0 {
      return;
    }
    // 按作业 ID 哈希采样，避免在热路径引入随机数状态
    // Sample by job ID hash, keeping random number state off the hot path
    let mut hasher = DefaultHasher::new();
    job.id.hash(&mut hasher);
    let fraction = (hasher.finish() % 10_000) as f64 / 10_000.0;
    if fraction >= self.config.mirror_rate {
      return;
    }

    let mirror = mirror.clone();
    let job = job.clone();
    tokio::spawn(async move {
      if let Err(e) = mirror.mirror(&job).await {
        tracing::debug!(job_id = %job.id, error = %e, "mirror request failed");
      }
    });
  }
}
