//! Redis 后端模块
//! Redis backend module

mod redis_ledger;
pub mod redis_scripts;

pub use redis_ledger::RedisLedger;
