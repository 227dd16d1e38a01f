//! 内存后端模块
//! Memory backend module
//!
//! 本地运行与测试使用的全内存实现，不依赖任何外部服务
//! Fully in-memory implementations for local runs and tests, with no external
//! service dependencies

mod memory_ledger;
mod memory_queue;
mod support;

pub use memory_ledger::MemoryLedger;
pub use memory_queue::MemoryWorkerQueue;
pub use support::{MemoryBlobStore, MemoryNotificationChannel, StaticTenantLimits};
