//! 等待协调器模块
//! Wait coordinator module
//!
//! 阻塞式端点使用的"等待此作业结果"原语：轮询作业出现，在完成事件与
//! 截止时间之间竞速，结果被越界持久化时回退到外部存储，并把传输的错误
//! 载荷翻译回类型化错误
//! The "wait for this job's result" primitive used by request-blocking
//! endpoints: polls for materialization, races the completion event against a
//! deadline, falls back to the blob store when the result was persisted
//! out-of-band, and translates transported error payloads back into typed
//! errors

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::base::{BlobStore, CompletionEvent, JobSnapshot, Ledger, WorkerQueue};
use crate::config::QueueConfig;
use crate::error::{decode_worker_error, Error, Result};
use crate::job::Document;

/// 等待协调器
/// Wait coordinator
///
/// 每次调用恰好一个结局；调用方中止时 future 被丢弃，截止时间定时器与
/// 轮询也随之释放，不会泄漏
/// Exactly one outcome per call; when the caller aborts, dropping the future
/// releases the deadline timer and any outstanding polling, nothing leaks
pub struct WaitCoordinator {
  queue: Arc<dyn WorkerQueue>,
  ledger: Arc<dyn Ledger>,
  blobs: Arc<dyn BlobStore>,
  config: QueueConfig,
}

impl WaitCoordinator {
  /// 创建新的等待协调器
  /// Create a new wait coordinator
  pub fn new(
    queue: Arc<dyn WorkerQueue>,
    ledger: Arc<dyn Ledger>,
    blobs: Arc<dyn BlobStore>,
    config: QueueConfig,
  ) -> Self {
    Self {
      queue,
      ledger,
      blobs,
      config,
    }
  }

  /// 同步等待作业结果
  /// Synchronously wait for a job's result
  ///
  /// `timeout` 缺省取配置的等待截止时间
  /// A missing `timeout` takes the configured wait deadline
  pub async fn wait_for_job(
    &self,
    job_id: &str,
    timeout: Option<Duration>,
  ) -> Result<Vec<Document>> {
    let timeout = timeout.unwrap_or(self.config.wait_timeout);
    let deadline = tokio::time::Instant::now() + timeout;

    // 阶段一：等待作业出现在队列中。被暂存的作业要到排空后才可见。
    // Phase one: wait for the job to materialize in the queue. A parked job
    // only becomes visible once drained.
    let snapshot = loop {
      if let Some(snapshot) = self.queue.snapshot(job_id).await? {
        break snapshot;
      }
      if self.ledger.was_queue_timeout(job_id).await? {
        return Err(Error::ScrapeTimeoutInQueue);
      }
      let now = tokio::time::Instant::now();
      if now >= deadline {
        return Err(Error::ScrapeTimeoutInQueue);
      }
      let nap = std::cmp::min(self.config.poll_interval, deadline - now);
      tokio::time::sleep(nap).await;
    };
    let zero_data_retention = snapshot.zero_data_retention;

    // 阶段二：在完成事件与剩余预算之间竞速
    // Phase two: race the completion event against the remaining budget
    let event = match terminal_event(&snapshot) {
      Some(event) => event,
      None => {
        let mut stream = self.queue.subscribe(job_id).await?;
        // 订阅后重读快照，补上订阅前完成的竞态窗口
        // Re-read the snapshot after subscribing, covering a completion that
        // landed before the subscription
        let recheck = self.queue.snapshot(job_id).await?;
        match recheck.as_ref().and_then(terminal_event) {
          Some(event) => event,
          None => {
            tokio::select! {
              maybe = stream.next() => {
                maybe.ok_or_else(|| Error::other("completion stream ended unexpectedly"))?
              }
              _ = tokio::time::sleep_until(deadline) => {
                return Err(Error::ScrapeTimeout);
              }
            }
          }
        }
      }
    };

    match event {
      CompletionEvent::Failed { error } => Err(decode_worker_error(&error)),
      CompletionEvent::Completed { documents } => {
        if let Some(documents) = documents {
          if !documents.is_empty() {
            return Ok(documents);
          }
        }
        self.fetch_out_of_band(job_id, zero_data_retention).await
      }
    }
  }

  /// 从外部存储取回越界持久化的结果
  /// Fetch an out-of-band persisted result from the blob store
  async fn fetch_out_of_band(
    &self,
    job_id: &str,
    zero_data_retention: bool,
  ) -> Result<Vec<Document>> {
    let Some(documents) = self.blobs.get(job_id).await? else {
      return Err(Error::ResultNotFound {
        job_id: job_id.to_string(),
      });
    };
    if zero_data_retention {
      if let Err(e) = self.blobs.delete(job_id).await {
        tracing::warn!(job_id, error = %e, "zero data retention purge failed");
      }
    }
    Ok(documents)
  }
}

/// 从终态快照构造完成事件；非终态返回 None
/// Build a completion event from a terminal snapshot; None when not terminal
fn terminal_event(snapshot: &JobSnapshot) -> Option<CompletionEvent> {
  match snapshot.state {
    crate::base::JobState::Completed => Some(CompletionEvent::Completed {
      documents: snapshot.documents.clone(),
    }),
    crate::base::JobState::Failed => Some(CompletionEvent::Failed {
      error: snapshot.error.clone().unwrap_or_default(),
    }),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::base::{EnqueueOptions, WorkerQueue};
  use crate::error::TransportableError;
  use crate::job::ScrapeJob;
  use crate::memdb::{MemoryBlobStore, MemoryLedger, MemoryWorkerQueue};

  struct Harness {
    waiter: WaitCoordinator,
    queue: Arc<MemoryWorkerQueue>,
    ledger: Arc<MemoryLedger>,
    blobs: Arc<MemoryBlobStore>,
  }

  fn harness() -> Harness {
    let queue = Arc::new(MemoryWorkerQueue::new());
    let ledger = Arc::new(MemoryLedger::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let config = QueueConfig::default().poll_interval(Duration::from_millis(10));
    let waiter = WaitCoordinator::new(queue.clone(), ledger.clone(), blobs.clone(), config);
    Harness {
      waiter,
      queue,
      ledger,
      blobs,
    }
  }

  async fn enqueued(h: &Harness) -> ScrapeJob {
    let job = ScrapeJob::single_url("t", "https://a.example");
    h.queue
      .enqueue(&job, &EnqueueOptions::default())
      .await
      .unwrap();
    job
  }

  #[tokio::test]
  async fn test_wait_returns_inline_result() {
    let h = harness();
    let job = enqueued(&h).await;

    let queue = h.queue.clone();
    let job_id = job.id.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(30)).await;
      queue
        .complete(&job_id, vec![Document::markdown("https://a.example", "# ok")])
        .await;
    });

    let documents = h.waiter.wait_for_job(&job.id, None).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].markdown.as_deref(), Some("# ok"));
  }

  #[tokio::test]
  async fn test_wait_timeout_in_queue() {
    let h = harness();
    // 作业从未出现在队列中
    // The job never materializes in the queue
    let started = tokio::time::Instant::now();
    let err = h
      .waiter
      .wait_for_job("ghost", Some(Duration::from_millis(200)))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::ScrapeTimeoutInQueue));
    assert!(started.elapsed() >= Duration::from_millis(200));
  }

  #[tokio::test]
  async fn test_wait_observes_queue_timeout_tombstone() {
    let h = harness();
    h.ledger
      .mark_queue_timeout("dropped", Duration::from_secs(60))
      .await
      .unwrap();

    let started = tokio::time::Instant::now();
    let err = h
      .waiter
      .wait_for_job("dropped", Some(Duration::from_secs(30)))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::ScrapeTimeoutInQueue));
    // 墓碑让等待立即失败，而不是耗尽整个预算
    // The tombstone fails the wait immediately instead of burning the budget
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[tokio::test]
  async fn test_wait_deadline_while_running() {
    let h = harness();
    let job = enqueued(&h).await;

    let err = h
      .waiter
      .wait_for_job(&job.id, Some(Duration::from_millis(100)))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::ScrapeTimeout));
  }

  #[tokio::test]
  async fn test_wait_rebuilds_transportable_error() {
    let h = harness();
    let job = enqueued(&h).await;
    let wire = TransportableError::new("dns_resolution_error", "no such host").to_wire();
    h.queue.fail(&job.id, &wire).await;

    let err = h.waiter.wait_for_job(&job.id, None).await.unwrap_err();
    match err {
      Error::Transportable(e) => {
        assert_eq!(e.kind, "dns_resolution_error");
        assert_eq!(e.message, "no such host");
      }
      other => panic!("expected transportable error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_wait_plain_error_is_generic() {
    let h = harness();
    let job = enqueued(&h).await;
    h.queue.fail(&job.id, "segfault").await;

    let err = h.waiter.wait_for_job(&job.id, None).await.unwrap_err();
    assert!(matches!(err, Error::Other { .. }));
  }

  #[tokio::test]
  async fn test_wait_falls_back_to_blob_store() {
    let h = harness();
    let job = enqueued(&h).await;
    h.blobs
      .put(&job.id, vec![Document::markdown("https://a.example", "# big")])
      .await;
    h.queue.complete_out_of_band(&job.id).await;

    let documents = h.waiter.wait_for_job(&job.id, None).await.unwrap();
    assert_eq!(documents[0].markdown.as_deref(), Some("# big"));
    // 非零保留作业的结果继续留在外部存储
    // The stored result stays put for a non-ZDR job
    assert!(h.blobs.contains(&job.id).await);
  }

  #[tokio::test]
  async fn test_wait_zero_data_retention_purges_blob() {
    let h = harness();
    let job = ScrapeJob::single_url("t", "https://a.example").with_zero_data_retention();
    h.queue
      .enqueue(&job, &EnqueueOptions::default())
      .await
      .unwrap();
    h.blobs
      .put(&job.id, vec![Document::markdown("https://a.example", "# zdr")])
      .await;
    h.queue.complete_out_of_band(&job.id).await;

    let documents = h.waiter.wait_for_job(&job.id, None).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert!(!h.blobs.contains(&job.id).await);
  }

  #[tokio::test]
  async fn test_wait_result_not_found() {
    let h = harness();
    let job = enqueued(&h).await;
    h.queue.complete_out_of_band(&job.id).await;

    let err = h.waiter.wait_for_job(&job.id, None).await.unwrap_err();
    assert!(matches!(err, Error::ResultNotFound { .. }));
  }
}
