//! 准入控制器模块
//! Admission controller module
//!
//! 对每个提交的作业应用三级限额规则：管理性旁路、可选的每爬取门限、
//! 每租户上限，给出 {立即准入, 租户暂存, 爬取暂存} 的裁决
//! Applies the three-tier limit rule to every submitted job: the
//! administrative bypass, the optional per-crawl gate, and the per-tenant
//! ceiling, producing an {admit now, defer for tenant, defer for crawl}
//! verdict

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::base::{Ledger, TenantLimits};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::job::{DispatchOptions, JobMode, LimitMode, ScrapeJob};

/// 准入裁决
/// Admission verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// 立即进入工作者队列
  /// Enter the worker queue immediately
  Admit,
  /// 租户上限已满，暂存
  /// Tenant ceiling full, park
  DeferTenant,
  /// 爬取门限已满，暂存
  /// Crawl gate full, park
  DeferCrawl,
}

/// 单作业的准入结果
/// Admission outcome for a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
  /// 裁决
  /// Verdict
  pub verdict: Verdict,
  /// 作业所属爬取是否受门限约束；决定准入时是否登记爬取槽位
  /// Whether the job's crawl is gated; decides whether admission registers a
  /// crawl slot
  pub crawl_bounded: bool,
}

/// 批量准入中被准入的作业
/// A job admitted by bulk planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAdmit {
  /// 输入切片中的下标
  /// Index into the input slice
  pub index: usize,
  /// 作业所属爬取是否受门限约束
  /// Whether the job's crawl is gated
  pub crawl_bounded: bool,
}

/// 批量准入计划
/// Bulk admission plan
///
/// 裁决保持输入顺序：下标向量均按升序排列
/// Verdicts keep input order: every index vector is ascending
#[derive(Debug, Clone, Default)]
pub struct BulkPlan {
  /// 立即准入的作业
  /// Jobs admitted immediately
  pub admit: Vec<PlannedAdmit>,
  /// 因租户上限暂存的作业下标
  /// Indexes parked for the tenant ceiling
  pub defer_tenant: Vec<usize>,
  /// 因爬取门限强制暂存的作业下标
  /// Indexes force-parked for a crawl gate
  pub defer_crawl: Vec<usize>,
  /// 本次提交自身造成的积压超过上限，应触发通知闸门
  /// The backlog this submission creates by itself exceeds the ceiling and
  /// should trip the notification gate
  pub notify: bool,
  /// 批次包含爬取/批量抓取，通知被抑制
  /// The batch belongs to a crawl/batch scrape, suppressing the notification
  pub suppress_notification: bool,
}

/// 准入控制器
/// Admission controller
///
/// 除台账 I/O 外不阻塞，也不做任何 CPU 密集工作；批量路径对台账的往返
/// 次数是 O(爬取桶数 + 2)，与批次大小无关
/// Non-blocking apart from ledger I/O, with no CPU-bound work; the bulk path
/// issues O(#crawl buckets + 2) ledger round-trips regardless of batch size
pub struct AdmissionController {
  ledger: Arc<dyn Ledger>,
  limits: Arc<dyn TenantLimits>,
  config: QueueConfig,
}

impl AdmissionController {
  /// 创建新的准入控制器
  /// Create a new admission controller
  pub fn new(ledger: Arc<dyn Ledger>, limits: Arc<dyn TenantLimits>, config: QueueConfig) -> Self {
    Self {
      ledger,
      limits,
      config,
    }
  }

  /// 租户在指定模式下的有效上限
  /// The tenant's effective ceiling for a mode
  ///
  /// 未知租户与查询失败都退化到缺省上限
  /// Both an unknown tenant and a lookup failure degrade to the default
  pub async fn team_ceiling(&self, team_id: &str, mode: LimitMode) -> u32 {
    match self.limits.ceiling(team_id, mode).await {
      Ok(Some(ceiling)) => ceiling,
      Ok(None) => self.config.default_ceiling,
      Err(e) => {
        tracing::warn!(
          team_id,
          mode = mode.as_str(),
          error = %e,
          "tenant limit lookup failed, using default ceiling"
        );
        self.config.default_ceiling
      }
    }
  }

  /// 爬取门限的剩余空位；None 表示不设门限
  /// Remaining headroom of a crawl gate; None means unbounded
  ///
  /// 门限记录缺失或读取失败都按不设门限处理
  /// A missing or unreadable gate record counts as unbounded
  pub async fn crawl_headroom(
    &self,
    crawl_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<u64>> {
    let gate = match self.ledger.crawl_gate(crawl_id).await {
      Ok(gate) => gate,
      Err(e) => {
        tracing::warn!(crawl_id, error = %e, "crawl gate lookup failed, treating as unbounded");
        return Ok(None);
      }
    };
    let Some(ceiling) = gate.and_then(|g| g.ceiling()) else {
      return Ok(None);
    };
    let active = self.ledger.count_crawl_active(crawl_id, now).await?;
    Ok(Some((ceiling as u64).saturating_sub(active)))
  }

  /// 单作业准入
  /// Single job admission
  pub async fn admit_one(&self, job: &ScrapeJob, opts: &DispatchOptions) -> Result<Admission> {
    // 管理性旁路：不查询任何限额
    // Administrative bypass: consults no limits
    if opts.direct_to_queue {
      return Ok(Admission {
        verdict: Verdict::Admit,
        crawl_bounded: false,
      });
    }

    let now = Utc::now();
    let mut crawl_bounded = false;
    if let Some(crawl_id) = &job.crawl_id {
      if let Some(free) = self.crawl_headroom(crawl_id, now).await? {
        crawl_bounded = true;
        if free == 0 {
          return Ok(Admission {
            verdict: Verdict::DeferCrawl,
            crawl_bounded,
          });
        }
      }
    }

    let ceiling = self.team_ceiling(&job.team_id, job.limit_mode()).await;
    self.ledger.clean_expired(&job.team_id, now).await?;
    let active = self.ledger.count_active(&job.team_id, now).await?;
    let verdict = if active >= ceiling as u64 {
      Verdict::DeferTenant
    } else {
      Verdict::Admit
    };
    Ok(Admission {
      verdict,
      crawl_bounded,
    })
  }

  /// 批量准入规划
  /// Bulk admission planning
  ///
  /// 输入顺序决定一切：优先级不参与批内排序，只透传给工作者队列
  /// Input order decides everything: priority plays no part in intra-batch
  /// ordering and is only passed through to the worker queue
  pub async fn plan_bulk(&self, team_id: &str, jobs: &[ScrapeJob]) -> Result<BulkPlan> {
    if jobs.is_empty() {
      return Ok(BulkPlan::default());
    }
    let now = Utc::now();

    // 按爬取分桶，保持首次出现的顺序
    // Bucket by crawl, keeping first-appearance order
    let mut buckets: Vec<(Option<&str>, Vec<usize>)> = Vec::new();
    for (index, job) in jobs.iter().enumerate() {
      let crawl_id = job.crawl_id.as_deref();
      match buckets.iter_mut().find(|(id, _)| *id == crawl_id) {
        Some((_, indexes)) => indexes.push(index),
        None => buckets.push((crawl_id, vec![index])),
      }
    }

    let mut admissible = vec![false; jobs.len()];
    let mut crawl_bounded = vec![false; jobs.len()];
    let mut defer_crawl: Vec<usize> = Vec::new();
    let mut has_crawl_bucket = false;

    for (crawl_id, indexes) in &buckets {
      match crawl_id {
        None => {
          for &index in indexes {
            admissible[index] = true;
          }
        }
        Some(crawl_id) => {
          has_crawl_bucket = true;
          match self.crawl_headroom(crawl_id, now).await? {
            None => {
              for &index in indexes {
                admissible[index] = true;
              }
            }
            Some(free) => {
              // 桶内前 free 个可望准入，其余的爬取门限已经耗尽
              // The first free of the bucket are potentially admissible; the
              // crawl gate is already exhausted for the rest
              for (position, &index) in indexes.iter().enumerate() {
                crawl_bounded[index] = true;
                if (position as u64) < free {
                  admissible[index] = true;
                } else {
                  defer_crawl.push(index);
                }
              }
            }
          }
        }
      }
    }
    defer_crawl.sort_unstable();

    // 批次按租户同质提交，上限取首个作业的模式
    // Batches are tenant-homogeneous; the ceiling follows the first job's mode
    let mode = jobs[0].limit_mode();
    let ceiling = self.team_ceiling(team_id, mode).await;
    self.ledger.clean_expired(team_id, now).await?;
    let active = self.ledger.count_active(team_id, now).await?;
    let free_tenant = (ceiling as u64).saturating_sub(active);

    let mut admit = Vec::new();
    let mut defer_tenant = Vec::new();
    for (index, job_admissible) in admissible.iter().enumerate() {
      if !job_admissible {
        continue;
      }
      if (admit.len() as u64) < free_tenant {
        admit.push(PlannedAdmit {
          index,
          crawl_bounded: crawl_bounded[index],
        });
      } else {
        defer_tenant.push(index);
      }
    }

    let admissible_count = (admit.len() + defer_tenant.len()) as u64;
    let suppress_notification = has_crawl_bucket
      || jobs
        .iter()
        .any(|job| matches!(job.mode, JobMode::Crawl | JobMode::BatchScrape));
    let notify = admissible_count.saturating_sub(free_tenant) > ceiling as u64;

    Ok(BulkPlan {
      admit,
      defer_tenant,
      defer_crawl,
      notify,
      suppress_notification,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::CrawlGate;
  use crate::memdb::{MemoryLedger, StaticTenantLimits};
  use std::time::Duration;

  fn controller(limits: StaticTenantLimits) -> (AdmissionController, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let controller = AdmissionController::new(
      ledger.clone(),
      Arc::new(limits),
      QueueConfig::default(),
    );
    (controller, ledger)
  }

  #[tokio::test]
  async fn test_admit_below_ceiling() {
    let (controller, _) = controller(StaticTenantLimits::new().with_ceiling("t", 2));
    let job = ScrapeJob::single_url("t", "https://a.example");

    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::Admit);
    assert!(!admission.crawl_bounded);
  }

  #[tokio::test]
  async fn test_defer_at_ceiling() {
    let (controller, ledger) = controller(StaticTenantLimits::new().with_ceiling("t", 2));
    for id in ["a", "b"] {
      ledger
        .push_active("t", id, Duration::from_secs(60))
        .await
        .unwrap();
    }

    let job = ScrapeJob::single_url("t", "https://a.example");
    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::DeferTenant);
  }

  #[tokio::test]
  async fn test_unknown_tenant_defaults_to_two() {
    let (controller, ledger) = controller(StaticTenantLimits::new());
    let job = ScrapeJob::single_url("unknown", "https://a.example");

    ledger
      .push_active("unknown", "a", Duration::from_secs(60))
      .await
      .unwrap();
    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::Admit);

    ledger
      .push_active("unknown", "b", Duration::from_secs(60))
      .await
      .unwrap();
    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::DeferTenant);
  }

  #[tokio::test]
  async fn test_zero_ceiling_defers_everything() {
    let (controller, _) = controller(StaticTenantLimits::new().with_ceiling("t", 0));
    let job = ScrapeJob::single_url("t", "https://a.example");

    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::DeferTenant);
  }

  #[tokio::test]
  async fn test_direct_bypass_skips_limits() {
    let (controller, ledger) = controller(StaticTenantLimits::new().with_ceiling("t", 0));
    for id in ["a", "b", "c"] {
      ledger
        .push_active("t", id, Duration::from_secs(60))
        .await
        .unwrap();
    }

    let job = ScrapeJob::single_url("t", "https://a.example");
    let admission = controller
      .admit_one(&job, &DispatchOptions::direct())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::Admit);
  }

  #[tokio::test]
  async fn test_crawl_gate_defers() {
    let (controller, ledger) = controller(StaticTenantLimits::new().with_ceiling("t", 10));
    ledger
      .save_crawl_gate(
        "c-1",
        &CrawlGate {
          max_concurrency: Some(1),
          delay_seconds: None,
        },
      )
      .await
      .unwrap();
    ledger
      .push_crawl_active("c-1", "other", Duration::from_secs(60))
      .await
      .unwrap();

    let job = ScrapeJob::single_url("t", "https://a.example").with_crawl("c-1");
    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::DeferCrawl);
    assert!(admission.crawl_bounded);
  }

  #[tokio::test]
  async fn test_missing_crawl_gate_is_unbounded() {
    let (controller, _) = controller(StaticTenantLimits::new().with_ceiling("t", 5));
    let job = ScrapeJob::single_url("t", "https://a.example").with_crawl("ghost");

    let admission = controller
      .admit_one(&job, &DispatchOptions::default())
      .await
      .unwrap();
    assert_eq!(admission.verdict, Verdict::Admit);
    assert!(!admission.crawl_bounded);
  }

  #[tokio::test]
  async fn test_delay_implies_ceiling_of_one() {
    let (controller, ledger) = controller(StaticTenantLimits::new().with_ceiling("t", 10));
    ledger
      .save_crawl_gate(
        "c-1",
        &CrawlGate {
          max_concurrency: None,
          delay_seconds: Some(5.0),
        },
      )
      .await
      .unwrap();

    let headroom = controller.crawl_headroom("c-1", Utc::now()).await.unwrap();
    assert_eq!(headroom, Some(1));
  }

  #[tokio::test]
  async fn test_bulk_plan_preserves_input_order() {
    let (controller, _) = controller(StaticTenantLimits::new().with_ceiling("t", 2));
    let jobs: Vec<ScrapeJob> = (0..5)
      .map(|i| ScrapeJob::single_url("t", format!("https://{i}.example")).with_priority(5 - i))
      .collect();

    let plan = controller.plan_bulk("t", &jobs).await.unwrap();
    // 优先级不参与批内排序
    // Priority plays no part in intra-batch ordering
    let admitted: Vec<usize> = plan.admit.iter().map(|a| a.index).collect();
    assert_eq!(admitted, vec![0, 1]);
    assert_eq!(plan.defer_tenant, vec![2, 3, 4]);
    assert!(plan.defer_crawl.is_empty());
  }

  #[tokio::test]
  async fn test_bulk_plan_notification_trigger() {
    let (controller, _) = controller(StaticTenantLimits::new().with_ceiling("t", 2));

    // 5 个可望准入，free=2，积压 3 > 上限 2，触发通知
    // 5 admissible, free=2, backlog 3 > ceiling 2, notification fires
    let jobs: Vec<ScrapeJob> = (0..5)
      .map(|i| ScrapeJob::single_url("t", format!("https://{i}.example")))
      .collect();
    let plan = controller.plan_bulk("t", &jobs).await.unwrap();
    assert!(plan.notify);
    assert!(!plan.suppress_notification);

    // 4 个时积压 2 == 上限 2，不触发
    // With 4 the backlog 2 == ceiling 2, no trigger
    let jobs: Vec<ScrapeJob> = (0..4)
      .map(|i| ScrapeJob::single_url("t", format!("https://{i}.example")))
      .collect();
    let plan = controller.plan_bulk("t", &jobs).await.unwrap();
    assert!(!plan.notify);
  }

  #[tokio::test]
  async fn test_bulk_plan_crawl_bucket() {
    let (controller, ledger) = controller(StaticTenantLimits::new().with_ceiling("t", 3));
    ledger
      .save_crawl_gate(
        "c-1",
        &CrawlGate {
          max_concurrency: Some(1),
          delay_seconds: None,
        },
      )
      .await
      .unwrap();

    // 3 个爬取作业与 3 个即席作业交错
    // 3 crawl jobs interleaved with 3 ad-hoc jobs
    let jobs = vec![
      ScrapeJob::single_url("t", "https://c0.example").with_crawl("c-1"),
      ScrapeJob::single_url("t", "https://a0.example"),
      ScrapeJob::single_url("t", "https://c1.example").with_crawl("c-1"),
      ScrapeJob::single_url("t", "https://a1.example"),
      ScrapeJob::single_url("t", "https://c2.example").with_crawl("c-1"),
      ScrapeJob::single_url("t", "https://a2.example"),
    ];
    let plan = controller.plan_bulk("t", &jobs).await.unwrap();

    // 爬取桶只放行第一个；即席作业填满剩余的租户空位
    // The crawl bucket lets only its first through; ad-hoc jobs fill the
    // remaining tenant headroom
    let admitted: Vec<usize> = plan.admit.iter().map(|a| a.index).collect();
    assert_eq!(admitted, vec![0, 1, 3]);
    assert_eq!(plan.defer_tenant, vec![5]);
    assert_eq!(plan.defer_crawl, vec![2, 4]);
    assert!(plan.suppress_notification);
  }
}
