//! Redis 配置和连接管理模块
//! Redis configuration and connection management module

use redis::aio::MultiplexedConnection;
use redis::{ConnectionInfo, IntoConnectionInfo};

use crate::error::Result;

/// Redis 连接类型
/// Redis connection types
#[derive(Clone)]
pub enum RedisConnectionType {
  /// 单机连接
  /// Standalone connection
  Single {
    connection_info: ConnectionInfo,
  },
}

impl RedisConnectionType {
  /// 创建单机连接
  /// Create a standalone connection
  pub fn single<T: IntoConnectionInfo>(connection_info: T) -> Result<Self> {
    Ok(Self::Single {
      connection_info: connection_info.into_connection_info()?,
    })
  }

  /// 建立多路复用的异步连接
  /// Establish a multiplexed async connection
  pub async fn connect(&self) -> Result<MultiplexedConnection> {
    match self {
      Self::Single { connection_info } => {
        let client = redis::Client::open(connection_info.clone())?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(conn)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_single_connection_parsing() {
    let conn = RedisConnectionType::single("redis://127.0.0.1:6379");
    assert!(conn.is_ok());

    let conn = RedisConnectionType::single("not a url");
    assert!(conn.is_err());
  }
}
