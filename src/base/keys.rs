//! 存储键名定义
//! Storage key name definitions
//!
//! 租户与爬取的命名空间使用哈希标签，保证同一租户的多键脚本落在同一槽位
//! Tenant and crawl namespaces use hash tags so multi-key scripts for one
//! tenant land on the same slot

/// 全局键：存在暂存积压的租户集合
/// Global key: the set of tenants with a deferred backlog
pub const DEFERRED_TEAMS: &str = "scrapeq:deferred-teams";

/// 生成租户键前缀：scrapeq:{team_id}:
/// Generate the tenant key prefix: scrapeq:{team_id}:
pub fn team_key_prefix(team_id: &str) -> String {
  format!("scrapeq:{{{}}}:", team_id)
}

/// 租户活跃作业有序集合；member 为作业 ID，score 为过期时间（毫秒）
/// Tenant active job sorted set; member is the job ID, score the expiry in ms
pub fn active_key(team_id: &str) -> String {
  format!("{}active", team_key_prefix(team_id))
}

/// 租户暂存作业有序集合；member 为作业 ID，score 为排序复合值
/// Tenant deferred job sorted set; member is the job ID, score the ordering
/// composite
pub fn deferred_key(team_id: &str) -> String {
  format!("{}deferred", team_key_prefix(team_id))
}

/// 暂存作业载荷哈希；field 为作业 ID，value 为序列化条目
/// Deferred job payload hash; field is the job ID, value the serialized entry
pub fn deferred_data_key(team_id: &str) -> String {
  format!("{}deferred:data", team_key_prefix(team_id))
}

/// 租户某类通知的最近发送记录
/// Last-sent record of a notification kind for a tenant
pub fn notified_key(team_id: &str, kind: &str) -> String {
  format!("{}notified:{}", team_key_prefix(team_id), kind)
}

/// 爬取活跃作业有序集合
/// Crawl active job sorted set
pub fn crawl_active_key(crawl_id: &str) -> String {
  format!("scrapeq:crawl:{{{}}}:active", crawl_id)
}

/// 爬取门限记录
/// Crawl gate record
pub fn crawl_gate_key(crawl_id: &str) -> String {
  format!("scrapeq:crawl:{{{}}}:gate", crawl_id)
}

/// 停放中超时作业的墓碑
/// Tombstone of a job that timed out while parked
pub fn queue_timeout_key(job_id: &str) -> String {
  format!("scrapeq:qtimeout:{}", job_id)
}

/// 暂存排序 score 的优先级步长
/// Priority stride of the deferred ordering score
///
/// score = priority * 步长 + 入队毫秒时间戳；同优先级内保持入队顺序。
/// 毫秒时间戳必须小于步长，f64 的 53 位尾数在此范围内无损。
/// score = priority * stride + enqueue millisecond timestamp; insertion order
/// is kept within a priority. The millisecond timestamp must stay below the
/// stride; f64's 53-bit mantissa is exact over this range.
pub const DEFERRED_PRIORITY_STRIDE: f64 = 1e13;

/// 计算暂存排序 score
/// Compute the deferred ordering score
pub fn deferred_score(priority: i32, enqueue_at_ms: i64) -> f64 {
  priority as f64 * DEFERRED_PRIORITY_STRIDE + enqueue_at_ms as f64
}
