//! 基础抽象模块
//! Base abstraction module
//!
//! 定义了准入核心与其外部协作者之间的接口：并发台账、工作者队列、
//! 结果外部存储、租户限额来源、通知通道与请求镜像
//! Defines the interfaces between the admission core and its external
//! collaborators: the concurrency ledger, the worker queue, the blob store
//! for oversized results, the tenant limit source, the notification channel,
//! and the request mirror

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::job::{CrawlGate, DeferredEntry, Document, LimitMode, ScrapeJob};
use crate::notify::NotificationKind;

pub mod constants;
pub mod keys;

/// 并发台账特性：当前活跃作业与暂存作业的权威存储
/// Concurrency ledger trait: the authoritative store of currently active jobs
/// and of parked jobs
///
/// 台账不解释作业内容；所有操作都是针对单个租户或单个爬取的原子原语。
/// 针对同一 job_id 的重复写入是幂等的：重复 push_active 仅刷新过期时间，
/// 重复 push_deferred 替换旧条目。
/// The ledger does not interpret job contents; every operation is an atomic
/// primitive scoped to one tenant or one crawl. Repeated writes for the same
/// job_id are idempotent: a duplicate push_active only refreshes the expiry,
/// a duplicate push_deferred replaces the prior entry.
#[async_trait]
pub trait Ledger: Send + Sync {
  /// Ping 存储连接
  /// Ping the store connection
  async fn ping(&self) -> Result<()>;

  /// 登记租户的活跃作业，条目在 now+ttl 前可见
  /// Register a tenant's active job; the entry stays observable until now+ttl
  async fn push_active(&self, team_id: &str, job_id: &str, ttl: Duration) -> Result<()>;

  /// 登记爬取的活跃作业
  /// Register a crawl's active job
  async fn push_crawl_active(&self, crawl_id: &str, job_id: &str, ttl: Duration) -> Result<()>;

  /// 统计租户未过期的活跃作业数
  /// Count the tenant's non-expired active jobs
  async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u64>;

  /// 统计爬取未过期的活跃作业数
  /// Count the crawl's non-expired active jobs
  async fn count_crawl_active(&self, crawl_id: &str, now: DateTime<Utc>) -> Result<u64>;

  /// 移除租户已过期的活跃条目；准入计数前必须成对调用
  /// Remove the tenant's expired active entries; must be paired with the
  /// count used for an admission decision
  async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<()>;

  /// 显式释放租户的活跃槽位（作业完成或失败时）
  /// Explicitly release a tenant's active slot (on job completion or failure)
  async fn remove_active(&self, team_id: &str, job_id: &str) -> Result<()>;

  /// 显式释放爬取的活跃槽位
  /// Explicitly release a crawl's active slot
  async fn remove_crawl_active(&self, crawl_id: &str, job_id: &str) -> Result<()>;

  /// 暂存一个作业条目，按 (priority, enqueue_at) 排序
  /// Park a job entry, ordered by (priority, enqueue_at)
  async fn push_deferred(&self, team_id: &str, entry: &DeferredEntry) -> Result<()>;

  /// 统计租户的暂存条目数
  /// Count the tenant's deferred entries
  async fn count_deferred(&self, team_id: &str) -> Result<u64>;

  /// 按序弹出至多 n 个暂存条目
  /// Pop up to n deferred entries in order
  async fn pop_deferred(&self, team_id: &str, n: usize) -> Result<Vec<DeferredEntry>>;

  /// 列出存在暂存积压的租户
  /// List tenants with a deferred backlog
  async fn deferred_teams(&self) -> Result<Vec<String>>;

  /// 保存爬取门限记录
  /// Save a crawl gate record
  async fn save_crawl_gate(&self, crawl_id: &str, gate: &CrawlGate) -> Result<()>;

  /// 读取爬取门限记录；缺失表示不设门限
  /// Read a crawl gate record; absence means unbounded
  async fn crawl_gate(&self, crawl_id: &str) -> Result<Option<CrawlGate>>;

  /// 原子地认领一次通知发送窗口；窗口内已认领则返回 false
  /// Atomically claim a notification send window; false when already claimed
  /// within the window
  async fn try_claim_notification(
    &self,
    team_id: &str,
    kind: &str,
    interval: Duration,
  ) -> Result<bool>;

  /// 为停放中超时的作业写入墓碑，供等待协调器观察
  /// Write a tombstone for a job that timed out while parked, observable by
  /// the wait coordinator
  async fn mark_queue_timeout(&self, job_id: &str, ttl: Duration) -> Result<()>;

  /// 查询作业是否在停放中超时
  /// Check whether a job timed out while parked
  async fn was_queue_timeout(&self, job_id: &str) -> Result<bool>;
}

/// 工作者队列中的作业状态
/// Job state in the worker queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
  /// 排队等待工作者
  /// Queued, waiting for a worker
  Waiting,
  /// 工作者处理中
  /// Being processed by a worker
  Active,
  /// 已成功完成
  /// Completed successfully
  Completed,
  /// 已失败
  /// Failed
  Failed,
}

impl JobState {
  /// 是否为终态
  /// Whether this is a terminal state
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// 入队后返回的作业句柄
/// Job handle returned after enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
  /// 作业 ID
  /// Job ID
  pub job_id: String,
}

/// 入队选项
/// Enqueue options
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
  /// 队内排序优先级，数值越小越紧急
  /// Intra-queue ordering priority, lower is more urgent
  pub priority: i32,
}

/// 作业在队列中的快照
/// Snapshot of a job in the queue
#[derive(Debug, Clone)]
pub struct JobSnapshot {
  /// 当前状态
  /// Current state
  pub state: JobState,
  /// 内联结果文档；None 或空集合表示结果被外部存储
  /// Inline result documents; None or empty means the result was stored
  /// out-of-band
  pub documents: Option<Vec<Document>>,
  /// 失败时的错误载荷
  /// Error payload on failure
  pub error: Option<String>,
  /// 作业的零数据保留标记
  /// The job's zero data retention flag
  pub zero_data_retention: bool,
}

/// 作业完成事件
/// Job completion event
#[derive(Debug, Clone)]
pub enum CompletionEvent {
  /// 成功完成
  /// Completed successfully
  Completed {
    /// 内联结果文档；None 或空集合表示结果被外部存储
    /// Inline result documents; None or empty means stored out-of-band
    documents: Option<Vec<Document>>,
  },
  /// 失败
  /// Failed
  Failed {
    /// 错误载荷，可能是序列化的结构化错误
    /// Error payload, possibly a serialized structured error
    error: String,
  },
}

/// 完成事件流
/// Completion event stream
pub type CompletionStream = Box<dyn futures::Stream<Item = CompletionEvent> + Unpin + Send>;

/// 工作者队列特性：外部代理队列的追加与观察接口
/// Worker queue trait: the append and observation interface of the external
/// broker queue
#[async_trait]
pub trait WorkerQueue: Send + Sync {
  /// 追加一个作业到队列
  /// Append a job to the queue
  async fn enqueue(&self, job: &ScrapeJob, opts: &EnqueueOptions) -> Result<JobHandle>;

  /// 读取作业快照；尚未出现在队列中时返回 None
  /// Read a job snapshot; None while the job has not materialized
  async fn snapshot(&self, job_id: &str) -> Result<Option<JobSnapshot>>;

  /// 订阅作业的完成事件
  /// Subscribe to a job's completion events
  async fn subscribe(&self, job_id: &str) -> Result<CompletionStream>;
}

/// 结果外部存储特性：工作者写入，等待协调器读取与清除
/// Blob store trait: workers write; the wait coordinator reads and purges
#[async_trait]
pub trait BlobStore: Send + Sync {
  /// 按作业 ID 读取外部存储的结果
  /// Fetch the stored result by job ID
  async fn get(&self, job_id: &str) -> Result<Option<Vec<Document>>>;

  /// 删除外部存储的结果
  /// Delete the stored result
  async fn delete(&self, job_id: &str) -> Result<()>;
}

/// 租户限额来源
/// Tenant limit source
///
/// 查询失败时调用方退化到缺省上限
/// On lookup failure the caller degrades to the default ceiling
#[async_trait]
pub trait TenantLimits: Send + Sync {
  /// 租户在指定模式下的并发上限；None 表示未知租户
  /// The tenant's concurrency ceiling for a mode; None for an unknown tenant
  async fn ceiling(&self, team_id: &str, mode: LimitMode) -> Result<Option<u32>>;
}

/// 通知通道特性：异步投递，投递失败由调用方记录并吞掉
/// Notification channel trait: asynchronous delivery; failures are logged and
/// swallowed by the caller
#[async_trait]
pub trait NotificationChannel: Send + Sync {
  /// 投递一条通知
  /// Deliver a notification
  async fn send(&self, team_id: &str, kind: NotificationKind) -> Result<()>;
}

/// 请求镜像特性：向镜像主机复制提交流量
/// Request mirror trait: replicates submission traffic to a mirror host
///
/// 镜像调用从不在准入路径上等待，其失败也从不影响准入结果
/// The mirror call is never awaited on the admission path and its failure
/// never affects the admission outcome
#[async_trait]
pub trait RequestMirror: Send + Sync {
  /// 镜像一次作业提交
  /// Mirror one job submission
  async fn mirror(&self, job: &ScrapeJob) -> Result<()>;
}
