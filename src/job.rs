//! 作业模块
//! Job module
//!
//! 定义了抓取作业及其相关的数据结构
//! Defines the scrape job and its related data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::base::constants::DEFAULT_SCRAPE_TIMEOUT;

/// 作业模式
/// Job mode
///
/// 封闭的变体集合；未知的抓取选项通过载荷的扩展映射透传
/// A closed set of variants; unknown scrape options pass through the payload's
/// extension map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobMode {
  /// 即席单个 URL 抓取
  /// Ad-hoc single URL scrape
  #[serde(rename = "single_urls")]
  SingleUrls,
  /// 属于一次爬取的抓取
  /// Scrape belonging to a crawl
  #[serde(rename = "crawl")]
  Crawl,
  /// 属于一次批量抓取的抓取
  /// Scrape belonging to a batch scrape
  #[serde(rename = "batch_scrape")]
  BatchScrape,
}

impl JobMode {
  /// 将作业模式转换为字符串
  /// Convert job mode to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::SingleUrls => "single_urls",
      Self::Crawl => "crawl",
      Self::BatchScrape => "batch_scrape",
    }
  }
}

/// 并发上限查询所用的模式
/// Mode used for concurrency ceiling lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitMode {
  /// 常规抓取/爬取配额
  /// Regular scrape/crawl quota
  #[serde(rename = "crawl")]
  Crawl,
  /// 提取配额
  /// Extract quota
  #[serde(rename = "extract")]
  Extract,
  /// 提取代理预览配额
  /// Extract agent preview quota
  #[serde(rename = "extract-agent-preview")]
  ExtractAgentPreview,
}

impl LimitMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Crawl => "crawl",
      Self::Extract => "extract",
      Self::ExtractAgentPreview => "extract-agent-preview",
    }
  }
}

/// 作业载荷：URL 加抓取选项
/// Job payload: the URL plus scrape options
///
/// 选项保持为不透明的扩展映射，按原样传递给工作者
/// Options stay an opaque extension map, passed through to the worker as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
  /// 要抓取的 URL
  /// URL to scrape
  pub url: String,
  /// 不透明的抓取选项
  /// Opaque scrape options
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub options: HashMap<String, Value>,
}

impl JobPayload {
  /// 创建新的作业载荷
  /// Create a new job payload
  pub fn new<U: Into<String>>(url: U) -> Self {
    Self {
      url: url.into(),
      options: HashMap::new(),
    }
  }

  /// 附加一个抓取选项
  /// Attach a scrape option
  pub fn with_option<K: Into<String>>(mut self, key: K, value: Value) -> Self {
    self.options.insert(key.into(), value);
    self
  }
}

/// 抓取作业：准入的基本单位
/// Scrape job: the unit of admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
  /// 作业 ID（UUID，调用方提供或生成）
  /// Job ID (UUID, caller-supplied or generated)
  pub id: String,
  /// 租户 ID
  /// Tenant ID
  pub team_id: String,
  /// 所属爬取 ID（可选）
  /// Owning crawl ID (optional)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crawl_id: Option<String>,
  /// 优先级，数值越小越紧急
  /// Priority, lower is more urgent
  #[serde(default)]
  pub priority: i32,
  /// 作业模式
  /// Job mode
  pub mode: JobMode,
  /// 抓取超时（毫秒），缺省 60 000
  /// Scrape timeout in milliseconds, defaulting to 60 000
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// 作业载荷
  /// Job payload
  pub payload: JobPayload,
  /// 是否为提取作业
  /// Whether this is an extract job
  #[serde(default)]
  pub is_extract: bool,
  /// 是否由提取流程派生
  /// Whether spawned from an extract flow
  #[serde(default)]
  pub from_extract: bool,
  /// 零数据保留：成功读取后必须清除外部存储的结果
  /// Zero data retention: the stored blob must be purged after a successful read
  #[serde(default)]
  pub zero_data_retention: bool,
}

impl ScrapeJob {
  /// 创建新作业，自动生成 ID
  /// Create a new job with a generated ID
  pub fn new<T: Into<String>>(team_id: T, mode: JobMode, payload: JobPayload) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      team_id: team_id.into(),
      crawl_id: None,
      priority: 10,
      mode,
      timeout_ms: None,
      payload,
      is_extract: false,
      from_extract: false,
      zero_data_retention: false,
    }
  }

  /// 创建即席单 URL 作业的便捷方法
  /// Convenience constructor for an ad-hoc single URL job
  pub fn single_url<T: Into<String>, U: Into<String>>(team_id: T, url: U) -> Self {
    Self::new(team_id, JobMode::SingleUrls, JobPayload::new(url))
  }

  /// 设置作业 ID
  /// Set the job ID
  pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
    self.id = id.into();
    self
  }

  /// 设置所属爬取
  /// Set the owning crawl
  pub fn with_crawl<S: Into<String>>(mut self, crawl_id: S) -> Self {
    self.crawl_id = Some(crawl_id.into());
    self
  }

  /// 设置优先级
  /// Set the priority
  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// 设置抓取超时
  /// Set the scrape timeout
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout_ms = Some(timeout.as_millis() as u64);
    self
  }

  /// 标记为提取作业
  /// Mark as an extract job
  pub fn with_extract(mut self, from_extract: bool) -> Self {
    self.is_extract = true;
    self.from_extract = from_extract;
    self
  }

  /// 标记零数据保留
  /// Mark zero data retention
  pub fn with_zero_data_retention(mut self) -> Self {
    self.zero_data_retention = true;
    self
  }

  /// 抓取超时，带缺省值
  /// Scrape timeout with its default applied
  pub fn scrape_timeout(&self) -> Duration {
    self
      .timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(DEFAULT_SCRAPE_TIMEOUT)
  }

  /// 上限查询所用的模式，由提取标记推导
  /// Ceiling lookup mode, derived from the extract flags
  pub fn limit_mode(&self) -> LimitMode {
    if self.is_extract {
      if self.from_extract {
        LimitMode::ExtractAgentPreview
      } else {
        LimitMode::Extract
      }
    } else {
      LimitMode::Crawl
    }
  }
}

/// 派发选项
/// Dispatch options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOptions {
  /// 管理性旁路：不消耗任何并发配额，直接进入工作者队列
  /// Administrative bypass: go straight to the worker queue without consuming
  /// any concurrency quota
  #[serde(default)]
  pub direct_to_queue: bool,
  /// 此作业曾被暂存过
  /// This job was parked at least once
  #[serde(default)]
  pub was_deferred: bool,
}

impl DispatchOptions {
  /// 直接入队的选项
  /// Options for direct enqueue
  pub fn direct() -> Self {
    Self {
      direct_to_queue: true,
      was_deferred: false,
    }
  }
}

/// 暂存作业条目
/// Deferred job entry
///
/// 排序键为 (priority, enqueue_at)；`hold_deadline` 为 None 表示无限期停放
/// Ordered by (priority, enqueue_at); a None `hold_deadline` parks indefinitely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntry {
  /// 暂存的作业
  /// The parked job
  pub job: ScrapeJob,
  /// 派发选项
  /// Dispatch options
  pub opts: DispatchOptions,
  /// 优先级快照，用于排序
  /// Priority snapshot used for ordering
  pub priority: i32,
  /// 入队时间（毫秒时间戳）
  /// Enqueue time (millisecond timestamp)
  pub enqueue_at: i64,
  /// 停放截止时间（毫秒时间戳）；超过后作业按"队列中超时"处理
  /// Hold deadline (millisecond timestamp); past it the job counts as timed
  /// out in queue
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hold_deadline: Option<i64>,
}

impl DeferredEntry {
  /// 从作业构造暂存条目
  /// Build a deferred entry from a job
  pub fn new(job: ScrapeJob, opts: DispatchOptions, now: DateTime<Utc>, hold: Option<Duration>) -> Self {
    let enqueue_at = now.timestamp_millis();
    let hold_deadline = hold.map(|h| enqueue_at + h.as_millis() as i64);
    Self {
      priority: job.priority,
      job,
      opts,
      enqueue_at,
      hold_deadline,
    }
  }

  /// 条目是否已超过停放截止时间
  /// Whether the entry is past its hold deadline
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self
      .hold_deadline
      .is_some_and(|deadline| deadline < now.timestamp_millis())
  }
}

/// 爬取门限记录
/// Crawl gate record
///
/// `max_concurrency` 给出显式上限；仅设置 `delay` 时上限为 1；两者皆无则不设门限
/// `max_concurrency` gives the explicit ceiling; a `delay` alone imposes a
/// ceiling of 1; with neither present no gate applies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlGate {
  /// 爬取内同时活跃作业的上限
  /// Maximum simultaneously active jobs within the crawl
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrency: Option<u32>,
  /// 页面间延迟（秒）；仅其存在即蕴含上限 1
  /// Inter-page delay in seconds; its presence alone implies a ceiling of 1
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay_seconds: Option<f64>,
}

impl CrawlGate {
  /// 有效的爬取上限；None 表示不设门限
  /// Effective crawl ceiling; None means unbounded
  pub fn ceiling(&self) -> Option<u32> {
    match (self.max_concurrency, self.delay_seconds) {
      (Some(max), _) => Some(max.max(1)),
      (None, Some(_)) => Some(1),
      (None, None) => None,
    }
  }

  /// 此爬取是否受门限约束
  /// Whether this crawl is gated
  pub fn is_bounded(&self) -> bool {
    self.ceiling().is_some()
  }
}

/// 抓取结果文档
/// Scraped result document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
  /// 源 URL
  /// Source URL
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Markdown 内容
  /// Markdown content
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub markdown: Option<String>,
  /// 原始 HTML
  /// Raw HTML
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub html: Option<String>,
  /// 其余字段按原样携带
  /// Remaining fields carried through verbatim
  #[serde(flatten)]
  pub extra: HashMap<String, Value>,
}

impl Document {
  /// 创建带 Markdown 内容的文档
  /// Create a document with markdown content
  pub fn markdown<U: Into<String>, M: Into<String>>(url: U, markdown: M) -> Self {
    Self {
      url: Some(url.into()),
      markdown: Some(markdown.into()),
      ..Default::default()
    }
  }
}
