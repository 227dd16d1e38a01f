//! # Scrapeq
//!
//! 抓取作业的准入与派发核心，由 Redis 支持
//! Admission and dispatch core for scrape jobs, backed by Redis
//!
//! Scrapeq 位于公共 HTTP API 与实际执行抓取作业的工作者池之间。
//! Scrapeq sits between the public HTTP API and the worker pool that actually executes scrape jobs.
//! 它为每个提交的作业决定：立即进入工作者队列，还是暂存到并发等待区直到有空位。
//! For every submitted job it decides whether the job enters the worker queue immediately,
//! or is parked in the concurrency holding area until a slot frees up.
//!
//! ## 特性
//! ## Features
//!
//! - 每租户与每爬取的并发上限
//!   - Per-tenant and per-crawl concurrency ceilings
//! - 批量提交的公平准入，保持输入顺序
//!   - Fair bulk admission preserving input order
//! - 活跃槽位的 TTL 安全网，工作者崩溃后自愈
//!   - TTL safety net for active slots, self-healing after worker crashes
//! - 暂存作业按优先级加入队时间排出
//!   - Deferred jobs drain in priority-then-enqueue order
//! - 带截止时间的同步等待原语，支持越界结果回退
//!   - Synchronous wait primitive with deadlines and out-of-band result fallback
//! - 租户配额饱和时的限频通知
//!   - Rate-limited notifications when a tenant saturates its quota
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use scrapeq::config::QueueConfig;
//! use scrapeq::dispatch::{Dispatcher, DispatcherContext};
//! use scrapeq::job::{DispatchOptions, ScrapeJob};
//! use scrapeq::memdb::{
//!   MemoryLedger, MemoryNotificationChannel, MemoryWorkerQueue, StaticTenantLimits,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   // 组装依赖上下文（生产环境使用 rdb::RedisLedger）
//!   // Assemble the dependency context (use rdb::RedisLedger in production)
//!   let ctx = DispatcherContext {
//!     ledger: Arc::new(MemoryLedger::new()),
//!     queue: Arc::new(MemoryWorkerQueue::new()),
//!     limits: Arc::new(StaticTenantLimits::default()),
//!     notifications: Arc::new(MemoryNotificationChannel::new()),
//!     mirror: None,
//!   };
//!   let dispatcher = Dispatcher::new(ctx, QueueConfig::default());
//!
//!   // 提交单个作业
//!   // Submit a single job
//!   let job = ScrapeJob::single_url("team-1", "https://example.com");
//!   let handle = dispatcher
//!     .submit_one(job, DispatchOptions::default())
//!     .await?;
//!   println!("admitted: {}", handle.is_some());
//!   Ok(())
//! }
//! ```

pub mod admission;
pub mod base;
pub mod components;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod memdb;
pub mod notify;
pub mod rdb;
pub mod redis;
pub mod waiter;
