//! 配置模块
//! Configuration module
//!
//! 定义了准入核心的配置项：缺省上限、各类 TTL、通知重发间隔与镜像参数
//! Defines the admission core configuration: default ceilings, the TTLs, the
//! notification resend interval, and the mirror parameters

use std::time::Duration;

use crate::base::constants::{
  DEFAULT_ACTIVE_TTL, DEFAULT_DRAIN_INTERVAL, DEFAULT_NOTIFY_INTERVAL_DAYS, DEFAULT_POLL_INTERVAL,
  DEFAULT_SCRAPE_TIMEOUT, DEFAULT_TENANT_CEILING, DEFAULT_WAIT_TIMEOUT,
};
use crate::error::{Error, Result};

/// 队列配置
/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// 未知租户的缺省并发上限
  /// Default concurrency ceiling for an unknown tenant
  pub default_ceiling: u32,
  /// 活跃槽位条目的 TTL
  /// TTL of an active slot entry
  pub active_ttl: Duration,
  /// 抓取超时缺省值，同时是即席作业的停放上限
  /// Default scrape timeout, also the hold bound of an ad-hoc job
  pub scrape_timeout: Duration,
  /// 等待结果的缺省截止时间
  /// Default deadline when waiting for a result
  pub wait_timeout: Duration,
  /// 等待协调器的轮询间隔
  /// Poll interval of the wait coordinator
  pub poll_interval: Duration,
  /// 同类通知的最小重发间隔
  /// Minimum resend interval for a notification kind
  pub notify_interval: Duration,
  /// 排空扫描间隔
  /// Drain sweep interval
  pub drain_interval: Duration,
  /// 镜像采样率，范围 [0.0, 1.0]；0 关闭镜像
  /// Mirror sampling rate in [0.0, 1.0]; 0 disables mirroring
  pub mirror_rate: f64,
  /// 镜像主机
  /// Mirror host
  pub mirror_host: Option<String>,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      default_ceiling: DEFAULT_TENANT_CEILING,
      active_ttl: DEFAULT_ACTIVE_TTL,
      scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
      wait_timeout: DEFAULT_WAIT_TIMEOUT,
      poll_interval: DEFAULT_POLL_INTERVAL,
      notify_interval: Duration::from_secs(DEFAULT_NOTIFY_INTERVAL_DAYS * 24 * 60 * 60),
      drain_interval: DEFAULT_DRAIN_INTERVAL,
      mirror_rate: 0.0,
      mirror_host: None,
    }
  }
}

impl QueueConfig {
  /// 创建新的队列配置
  /// Create a new queue configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 从环境变量加载配置，缺失的项取缺省值
  /// Load configuration from environment variables, defaulting missing entries
  pub fn from_env() -> Result<Self> {
    let mut config = Self::default();
    if let Some(v) = read_env("SCRAPEQ_DEFAULT_CEILING")? {
      config.default_ceiling = v;
    }
    if let Some(ms) = read_env("SCRAPEQ_ACTIVE_TTL_MS")? {
      config.active_ttl = Duration::from_millis(ms);
    }
    if let Some(ms) = read_env("SCRAPEQ_SCRAPE_TIMEOUT_MS")? {
      config.scrape_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = read_env("SCRAPEQ_WAIT_TIMEOUT_MS")? {
      config.wait_timeout = Duration::from_millis(ms);
    }
    if let Some(days) = read_env::<u64>("SCRAPEQ_NOTIFY_INTERVAL_DAYS")? {
      config.notify_interval = Duration::from_secs(days * 24 * 60 * 60);
    }
    if let Some(rate) = read_env::<f64>("SCRAPEQ_MIRROR_RATE")? {
      config.mirror_rate = rate.clamp(0.0, 1.0);
    }
    if let Ok(host) = std::env::var("SCRAPEQ_MIRROR_HOST") {
      if !host.trim().is_empty() {
        config.mirror_host = Some(host);
      }
    }
    Ok(config)
  }

  /// 设置缺省并发上限
  /// Set the default concurrency ceiling
  pub fn default_ceiling(mut self, ceiling: u32) -> Self {
    self.default_ceiling = ceiling;
    self
  }

  /// 设置活跃条目 TTL
  /// Set the active entry TTL
  pub fn active_ttl(mut self, ttl: Duration) -> Self {
    self.active_ttl = ttl;
    self
  }

  /// 设置抓取超时
  /// Set the scrape timeout
  pub fn scrape_timeout(mut self, timeout: Duration) -> Self {
    self.scrape_timeout = timeout;
    self
  }

  /// 设置等待截止时间
  /// Set the wait deadline
  pub fn wait_timeout(mut self, timeout: Duration) -> Self {
    self.wait_timeout = timeout;
    self
  }

  /// 设置轮询间隔
  /// Set the poll interval
  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// 设置通知重发间隔
  /// Set the notification resend interval
  pub fn notify_interval(mut self, interval: Duration) -> Self {
    self.notify_interval = interval;
    self
  }

  /// 设置排空扫描间隔
  /// Set the drain sweep interval
  pub fn drain_interval(mut self, interval: Duration) -> Self {
    self.drain_interval = interval;
    self
  }
}

/// 读取并解析单个环境变量
/// Read and parse a single environment variable
fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
  match std::env::var(name) {
    Ok(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| Error::config(format!("invalid value for {name}: {raw}"))),
    Err(_) => Ok(None),
  }
}
