//! Redis Lua 脚本模块
//!
//! 提供台账多键操作所需的 Lua 脚本，保证同一租户命名空间内写入的原子性。
//! 脚本只在单个哈希槽的键上操作（全局租户集合除外），键布局见 base::keys。
//! Lua scripts for the ledger's multi-key operations, keeping writes within a
//! tenant namespace atomic. Apart from the global tenant set, each script only
//! touches keys of one hash slot; see base::keys for the layout.

use phf::phf_map;
use redis::aio::MultiplexedConnection;
use redis::{RedisWrite, ToRedisArgs};

use crate::error::{Error, Result};

/// 脚本参数的统一包装
/// Uniform wrapper for script arguments
#[derive(Clone, Debug)]
pub enum RedisArg {
  Int(i64),
  Str(String),
  Float(f64),
}

impl ToRedisArgs for RedisArg {
  fn write_redis_args<W>(&self, out: &mut W)
  where
    W: ?Sized + RedisWrite,
  {
    match self {
      RedisArg::Int(i) => i.write_redis_args(out),
      RedisArg::Str(s) => s.write_redis_args(out),
      RedisArg::Float(f) => f.write_redis_args(out),
    }
  }
}

/// 台账 Lua 脚本集合
/// Ledger Lua script collection
pub mod scripts {
  /// 登记活跃作业脚本
  /// Register active job script
  ///
  /// `KEYS[1]` -> scrapeq:{`<team_id>`}:active 或 scrapeq:crawl:{`<crawl_id>`}:active
  /// `ARGV[1]` -> 过期时间戳（毫秒，zset score）/ expiry timestamp in ms (zset score)
  /// `ARGV[2]` -> 作业 ID / job ID
  /// `ARGV[3]` -> 整键回收 TTL（毫秒）/ whole-key GC TTL in ms
  ///
  /// 重复登记同一作业仅刷新其过期时间
  /// Re-registering the same job only refreshes its expiry
  pub const PUSH_ACTIVE: &str = r#"
        redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
        redis.call("PEXPIRE", KEYS[1], ARGV[3])
        return redis.status_reply("OK")
    "#;

  /// 暂存作业脚本
  /// Park job script
  ///
  /// `KEYS[1]` -> scrapeq:{`<team_id>`}:deferred
  /// `KEYS[2]` -> scrapeq:{`<team_id>`}:deferred:data
  /// `KEYS[3]` -> scrapeq:deferred-teams
  /// `ARGV[1]` -> 排序 score / ordering score
  /// `ARGV[2]` -> 作业 ID / job ID
  /// `ARGV[3]` -> 序列化条目 / serialized entry
  /// `ARGV[4]` -> 租户 ID / team ID
  /// `ARGV[5]` -> 整键回收 TTL（毫秒）/ whole-key GC TTL in ms
  ///
  /// 重复暂存同一作业替换旧条目
  /// Re-parking the same job replaces the prior entry
  pub const PUSH_DEFERRED: &str = r#"
        redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
        redis.call("HSET", KEYS[2], ARGV[2], ARGV[3])
        redis.call("SADD", KEYS[3], ARGV[4])
        redis.call("PEXPIRE", KEYS[1], ARGV[5])
        redis.call("PEXPIRE", KEYS[2], ARGV[5])
        return redis.status_reply("OK")
    "#;

  /// 按序弹出暂存作业脚本
  /// Pop parked jobs in order script
  ///
  /// `KEYS[1]` -> scrapeq:{`<team_id>`}:deferred
  /// `KEYS[2]` -> scrapeq:{`<team_id>`}:deferred:data
  /// `KEYS[3]` -> scrapeq:deferred-teams
  /// `ARGV[1]` -> 最多弹出的条目数 / maximum number of entries to pop
  /// `ARGV[2]` -> 租户 ID / team ID
  ///
  /// 返回按 score 升序的序列化条目；积压清空时将租户移出全局集合
  /// Returns serialized entries in ascending score order; removes the tenant
  /// from the global set once the backlog is empty
  pub const POP_DEFERRED: &str = r#"
        local ids = redis.call("ZRANGE", KEYS[1], 0, tonumber(ARGV[1]) - 1)
        local out = {}
        for _, id in ipairs(ids) do
          local data = redis.call("HGET", KEYS[2], id)
          if data then
            table.insert(out, data)
          end
          redis.call("ZREM", KEYS[1], id)
          redis.call("HDEL", KEYS[2], id)
        end
        if redis.call("ZCARD", KEYS[1]) == 0 then
          redis.call("SREM", KEYS[3], ARGV[2])
        end
        return out
    "#;
}

/// 全部脚本，按名称索引
/// All scripts, indexed by name
static ALL_SCRIPT: phf::Map<&'static str, &'static str> = phf_map! {
  "push_active" => scripts::PUSH_ACTIVE,
  "push_deferred" => scripts::PUSH_DEFERRED,
  "pop_deferred" => scripts::POP_DEFERRED,
};

/// Redis 脚本管理器
/// Redis script manager
#[derive(Debug, Default)]
pub struct ScriptManager {
  /// 脚本 SHA 缓存
  /// Script SHA cache
  script_sha1: std::collections::HashMap<&'static str, String>,
}

impl ScriptManager {
  /// 预加载所有脚本
  /// Preload all scripts
  pub async fn load_scripts(&mut self, conn: &mut MultiplexedConnection) -> Result<()> {
    for (name, script) in ALL_SCRIPT.entries() {
      let sha = self.load_script(conn, script).await?;
      self.script_sha1.insert(*name, sha);
    }
    Ok(())
  }

  /// 加载单个脚本并返回其 SHA
  /// Load a single script and return its SHA
  pub async fn load_script(
    &self,
    conn: &mut MultiplexedConnection,
    script: &str,
  ) -> Result<String> {
    let sha: String = redis::cmd("SCRIPT")
      .arg("LOAD")
      .arg(script)
      .query_async(conn)
      .await?;
    Ok(sha)
  }

  /// 获取脚本 SHA
  /// Get a script's SHA
  pub fn get_script_sha(&self, name: &str) -> Option<&String> {
    self.script_sha1.get(name)
  }

  /// 执行脚本
  /// Execute a script
  ///
  /// 优先 EVALSHA；脚本被服务端清理时回退到重新加载并 EVAL
  /// EVALSHA first; falls back to reloading plus EVAL when the server has
  /// flushed the script
  pub async fn eval_script<T>(
    &self,
    conn: &mut MultiplexedConnection,
    script_name: &str,
    keys: &[String],
    args: &[RedisArg],
  ) -> Result<T>
  where
    T: redis::FromRedisValue,
  {
    let script = ALL_SCRIPT
      .get(script_name)
      .ok_or_else(|| Error::other(format!("Script not registered: {script_name}")))?;

    if let Some(sha) = self.get_script_sha(script_name) {
      let attempt: std::result::Result<T, redis::RedisError> = redis::cmd("EVALSHA")
        .arg(sha)
        .arg(keys.len())
        .arg(keys)
        .arg(args)
        .query_async(conn)
        .await;
      match attempt {
        Ok(result) => return Ok(result),
        Err(e) if e.to_string().contains("NOSCRIPT") => {
          // 脚本被清理了，继续使用 EVAL
          // The script was flushed, continue with EVAL
        }
        Err(e) => return Err(e.into()),
      }
    }

    let result: T = redis::cmd("EVAL")
      .arg(*script)
      .arg(keys.len())
      .arg(keys)
      .arg(args)
      .query_async(conn)
      .await?;
    Ok(result)
  }
}
