//! 错误处理模块
//! Error handling module
//!
//! 定义了 Scrapeq 库使用的各种错误类型，以及跨工作者边界传输的结构化错误
//! Defines the error types used by the Scrapeq library, plus the structured
//! error transported across the worker boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scrapeq 库的结果类型
/// Result type for the Scrapeq library
pub type Result<T> = std::result::Result<T, Error>;

/// Scrapeq 错误类型
/// Scrapeq error type
#[derive(Error, Debug)]
pub enum Error {
  /// 台账存储不可达，提交失败，调用方可以重试
  /// Ledger store unreachable; the submission fails and the caller may retry
  #[error("Ledger unavailable: {0}")]
  LedgerUnavailable(#[from] redis::RedisError),

  /// 台账写入后工作者队列入队失败；台账条目会经由 TTL 自愈
  /// Worker queue enqueue failed after ledger writes; ledger entries self-heal via TTL
  #[error("Worker queue unavailable: {message}")]
  WorkerQueueUnavailable { message: String },

  /// 等待协调器从未观察到作业出现在队列中
  /// The wait coordinator never saw the job materialize in the queue
  #[error("Scrape timed out while waiting in the concurrency queue")]
  ScrapeTimeoutInQueue,

  /// 作业已运行但未在截止时间内完成
  /// The job ran but did not complete within the deadline
  #[error("Scrape timed out")]
  ScrapeTimeout,

  /// 完成已上报，但既没有内联结果也没有外部存储的结果
  /// Completion reported but neither an inline result nor a stored blob exists
  #[error("Result not found for job {job_id}")]
  ResultNotFound { job_id: String },

  /// 工作者抛出的结构化错误，跨队列边界往返后按原样重新抛出
  /// Structured failure raised by the worker, re-raised with its original shape
  /// after round-tripping across the queue boundary
  #[error("{0}")]
  Transportable(TransportableError),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 无效的作业
  /// Invalid job
  #[error("Invalid job: {message}")]
  InvalidJob { message: String },

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建工作者队列错误
  /// Create a worker queue error
  pub fn worker_queue<S: Into<String>>(message: S) -> Self {
    Self::WorkerQueueUnavailable {
      message: message.into(),
    }
  }

  /// 创建无效作业错误
  /// Create an invalid job error
  pub fn invalid_job<S: Into<String>>(message: S) -> Self {
    Self::InvalidJob {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 检查是否为可重试错误
  /// Check if the error is retriable
  pub fn is_retriable(&self) -> bool {
    matches!(
      self,
      Error::LedgerUnavailable(_) | Error::WorkerQueueUnavailable { .. }
    )
  }

  /// 检查是否为超时类错误
  /// Check if the error is a timeout
  pub fn is_timeout(&self) -> bool {
    matches!(self, Error::ScrapeTimeout | Error::ScrapeTimeoutInQueue)
  }
}

/// 可传输错误：由工作者序列化、经队列边界传输、由调用方无损重建的结构化错误
/// Transportable error: a structured error serialized by the worker, carried
/// across the queue boundary, and reconstructed by the caller without loss
///
/// 往返不变量：`deserialize(serialize(e)) == e`，`kind` 与 `message` 均不丢失
/// Round-trip invariant: `deserialize(serialize(e)) == e`; neither `kind` nor
/// `message` is lost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportableError {
  /// 错误类别标识
  /// Error kind identifier
  pub kind: String,
  /// 人类可读的错误消息
  /// Human-readable error message
  pub message: String,
  /// 可选的底层原因
  /// Optional underlying cause
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cause: Option<Box<TransportableError>>,
}

impl TransportableError {
  /// 创建新的可传输错误
  /// Create a new transportable error
  pub fn new<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
      cause: None,
    }
  }

  /// 附加底层原因
  /// Attach an underlying cause
  pub fn with_cause(mut self, cause: TransportableError) -> Self {
    self.cause = Some(Box::new(cause));
    self
  }

  /// 序列化为传输形式
  /// Serialize to the transported form
  pub fn to_wire(&self) -> String {
    // Serialization of this shape cannot fail
    serde_json::to_string(self).unwrap_or_default()
  }

  /// 从传输载荷解析；不是结构化错误时返回 None
  /// Parse from a transported payload; None when it is not a structured error
  pub fn from_wire(payload: &str) -> Option<Self> {
    serde_json::from_str(payload).ok()
  }
}

impl std::fmt::Display for TransportableError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)?;
    if let Some(cause) = &self.cause {
      write!(f, " (caused by {cause})")?;
    }
    Ok(())
  }
}

/// 将工作者上报的错误载荷翻译为类型化错误
/// Translate an error payload reported by a worker into a typed error
///
/// 结构化载荷重建为 [`Error::Transportable`]，其余一律归为通用失败
/// Structured payloads are rebuilt as [`Error::Transportable`]; everything else
/// becomes a generic failure
pub fn decode_worker_error(payload: &str) -> Error {
  match TransportableError::from_wire(payload) {
    Some(err) => Error::Transportable(err),
    None => Error::other(payload.to_string()),
  }
}
