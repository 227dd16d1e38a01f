//! 内存版外部协作者
//! In-memory external collaborators
//!
//! 结果外部存储、租户限额与通知通道的内存实现，供测试与本地运行使用
//! Memory implementations of the blob store, tenant limits, and notification
//! channel, for tests and local runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::base::{BlobStore, NotificationChannel, TenantLimits};
use crate::error::{Error, Result};
use crate::job::{Document, LimitMode};
use crate::notify::NotificationKind;

/// 内存结果存储
/// Memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
  storage: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryBlobStore {
  /// 创建新的内存结果存储
  /// Create a new memory blob store
  pub fn new() -> Self {
    Self::default()
  }

  /// 写入一份结果，扮演越界持久化的工作者
  /// Store a result, playing the worker that persisted out-of-band
  pub async fn put(&self, job_id: &str, documents: Vec<Document>) {
    self
      .storage
      .write()
      .await
      .insert(job_id.to_string(), documents);
  }

  /// 结果是否存在
  /// Whether a result exists
  pub async fn contains(&self, job_id: &str) -> bool {
    self.storage.read().await.contains_key(job_id)
  }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
  async fn get(&self, job_id: &str) -> Result<Option<Vec<Document>>> {
    Ok(self.storage.read().await.get(job_id).cloned())
  }

  async fn delete(&self, job_id: &str) -> Result<()> {
    self.storage.write().await.remove(job_id);
    Ok(())
  }
}

/// 静态租户限额表
/// Static tenant limit table
#[derive(Default)]
pub struct StaticTenantLimits {
  per_mode: HashMap<(String, LimitMode), u32>,
  per_team: HashMap<String, u32>,
}

impl StaticTenantLimits {
  /// 创建空表；所有租户都视为未知
  /// Create an empty table; every tenant counts as unknown
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置租户在所有模式下的上限
  /// Set a tenant's ceiling across all modes
  pub fn with_ceiling<T: Into<String>>(mut self, team_id: T, ceiling: u32) -> Self {
    self.per_team.insert(team_id.into(), ceiling);
    self
  }

  /// 设置租户在单个模式下的上限
  /// Set a tenant's ceiling for a single mode
  pub fn with_mode_ceiling<T: Into<String>>(
    mut self,
    team_id: T,
    mode: LimitMode,
    ceiling: u32,
  ) -> Self {
    self.per_mode.insert((team_id.into(), mode), ceiling);
    self
  }
}

#[async_trait]
impl TenantLimits for StaticTenantLimits {
  async fn ceiling(&self, team_id: &str, mode: LimitMode) -> Result<Option<u32>> {
    if let Some(ceiling) = self.per_mode.get(&(team_id.to_string(), mode)) {
      return Ok(Some(*ceiling));
    }
    Ok(self.per_team.get(team_id).copied())
  }
}

/// 内存通知通道，记录每次投递
/// Memory notification channel recording every delivery
#[derive(Default)]
pub struct MemoryNotificationChannel {
  sent: Arc<RwLock<Vec<(String, NotificationKind)>>>,
  failing: AtomicBool,
}

impl MemoryNotificationChannel {
  /// 创建新的内存通知通道
  /// Create a new memory notification channel
  pub fn new() -> Self {
    Self::default()
  }

  /// 让后续投递失败，用于验证失败被吞掉
  /// Make subsequent deliveries fail, to verify failures are swallowed
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::Relaxed);
  }

  /// 已投递的通知
  /// Delivered notifications
  pub async fn sent(&self) -> Vec<(String, NotificationKind)> {
    self.sent.read().await.clone()
  }
}

#[async_trait]
impl NotificationChannel for MemoryNotificationChannel {
  async fn send(&self, team_id: &str, kind: NotificationKind) -> Result<()> {
    if self.failing.load(Ordering::Relaxed) {
      return Err(Error::other("notification channel down"));
    }
    self
      .sent
      .write()
      .await
      .push((team_id.to_string(), kind));
    Ok(())
  }
}
