//! 常量定义
//! Constant definitions

use std::time::Duration;

/// 未知租户的缺省并发上限
/// Default concurrency ceiling for an unknown tenant
pub const DEFAULT_TENANT_CEILING: u32 = 2;

/// 活跃槽位条目的 TTL，工作者崩溃后的安全网
/// TTL of an active slot entry, the safety net after a worker crash
pub const DEFAULT_ACTIVE_TTL: Duration = Duration::from_secs(60);

/// 抓取超时缺省值
/// Default scrape timeout
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(60);

/// 等待结果的缺省截止时间
/// Default deadline when waiting for a result
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(180);

/// 等待协调器轮询作业出现的间隔
/// Interval at which the wait coordinator polls for job materialization
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 同类通知的最小重发间隔（天）
/// Minimum resend interval for a notification kind, in days
pub const DEFAULT_NOTIFY_INTERVAL_DAYS: u64 = 15;

/// 排空扫描间隔
/// Drain sweep interval
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// 爬取门限记录的保存时长
/// Retention of a crawl gate record
pub const CRAWL_GATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 暂存键的垃圾回收 TTL，随每次写入刷新
/// Garbage collection TTL of deferred keys, refreshed on every write
pub const DEFERRED_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 队列中超时墓碑的保存时长
/// Retention of a timed-out-in-queue tombstone
pub const QUEUE_TIMEOUT_TOMBSTONE_TTL: Duration = Duration::from_secs(10 * 60);
