//! 通知闸门模块
//! Notification gate module
//!
//! 租户持续占满配额时发出限频的旁路通知；爬取与批量提交被抑制
//! Emits rate-limited side-channel notifications when a tenant persistently
//! saturates its quota; crawl and batch submissions are suppressed

use std::sync::Arc;
use std::time::Duration;

use crate::base::{Ledger, NotificationChannel};

/// 通知类别
/// Notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
  /// 并发配额已达上限
  /// Concurrency quota reached
  ConcurrencyLimitReached,
}

impl NotificationKind {
  /// 将通知类别转换为字符串
  /// Convert the notification kind to a string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ConcurrencyLimitReached => "concurrency-limit-reached",
    }
  }
}

impl std::fmt::Display for NotificationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// 通知闸门
/// Notification gate
///
/// 发送窗口通过台账原子认领，同一 (租户, 类别) 在窗口内至多发出一条；
/// 投递失败只记录，从不向提交路径传播
/// Send windows are claimed atomically through the ledger, at most one event
/// per (tenant, kind) within a window; delivery failures are logged and never
/// propagate to the submission path
pub struct NotificationGate {
  ledger: Arc<dyn Ledger>,
  channel: Arc<dyn NotificationChannel>,
  interval: Duration,
}

impl NotificationGate {
  /// 创建新的通知闸门
  /// Create a new notification gate
  pub fn new(
    ledger: Arc<dyn Ledger>,
    channel: Arc<dyn NotificationChannel>,
    interval: Duration,
  ) -> Self {
    Self {
      ledger,
      channel,
      interval,
    }
  }

  /// 可能发出一条通知
  /// Possibly emit one notification
  ///
  /// `suppressed_for_crawl` 为 true 时直接跳过：只有即席单 URL 的配额饱和
  /// 才值得打扰租户
  /// Skips outright when `suppressed_for_crawl` is true: only ad-hoc single
  /// URL saturation is worth bothering the tenant about
  pub async fn maybe_notify(
    &self,
    team_id: &str,
    kind: NotificationKind,
    suppressed_for_crawl: bool,
  ) {
    if suppressed_for_crawl {
      tracing::debug!(team_id, kind = %kind, "notification suppressed for crawl submission");
      return;
    }

    let claimed = match self
      .ledger
      .try_claim_notification(team_id, kind.as_str(), self.interval)
      .await
    {
      Ok(claimed) => claimed,
      Err(e) => {
        tracing::warn!(team_id, kind = %kind, error = %e, "notification window claim failed");
        return;
      }
    };
    if !claimed {
      return;
    }

    // 异步投递；闸门不等待结果
    // Asynchronous delivery; the gate does not wait for the outcome
    let channel = self.channel.clone();
    let team_id = team_id.to_string();
    tokio::spawn(async move {
      if let Err(e) = channel.send(&team_id, kind).await {
        tracing::warn!(team_id, kind = %kind, error = %e, "notification delivery failed");
      }
    });
  }
}
