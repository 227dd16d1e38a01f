//! 组件模块
//! Components module
//!
//! 提供后台组件的统一生命周期接口
//! Provides a unified lifecycle interface for background components

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod drainer;

/// 组件生命周期接口
/// Component lifecycle interface
///
/// 定义了组件的基本生命周期操作：启动、关闭和状态检查
/// Defines the basic lifecycle operations of a component: start, shutdown,
/// and state check
pub trait ComponentLifecycle {
  /// 启动组件
  /// Start the component
  ///
  /// 此方法启动组件的后台任务，返回一个 JoinHandle 用于等待任务完成
  /// Starts the component's background task, returning a JoinHandle to wait
  /// for completion
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 关闭组件
  /// Shutdown the component
  ///
  /// 发送关闭信号给组件，组件会在完成当前操作后停止
  /// Sends a shutdown signal; the component stops after completing its
  /// current operation
  fn shutdown(&self);

  /// 检查组件是否已完成
  /// Check if the component is done
  fn is_done(&self) -> bool;
}
