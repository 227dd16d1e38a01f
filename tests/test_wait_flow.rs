// mod test_wait_flow
//
// 提交加等待的组合流程：wait(submit_one(j)) 的结果与直接同步执行一致
// The combined submit-plus-wait flow: wait(submit_one(j)) matches what a
// direct synchronous execution would yield

use scrapeq::base::Ledger;
use scrapeq::components::drainer::Drainer;
use scrapeq::config::QueueConfig;
use scrapeq::dispatch::{Dispatcher, DispatcherContext};
use scrapeq::error::{Error, TransportableError};
use scrapeq::job::{DispatchOptions, Document, ScrapeJob};
use scrapeq::memdb::{
  MemoryBlobStore, MemoryLedger, MemoryNotificationChannel, MemoryWorkerQueue, StaticTenantLimits,
};
use scrapeq::waiter::WaitCoordinator;
use std::sync::Arc;
use std::time::Duration;

struct Stack {
  dispatcher: Dispatcher,
  drainer: Arc<Drainer>,
  waiter: WaitCoordinator,
  queue: Arc<MemoryWorkerQueue>,
  blobs: Arc<MemoryBlobStore>,
  ledger: Arc<MemoryLedger>,
}

fn stack(limits: StaticTenantLimits) -> Stack {
  let limits = Arc::new(limits);
  let ledger = Arc::new(MemoryLedger::new());
  let queue = Arc::new(MemoryWorkerQueue::new());
  let blobs = Arc::new(MemoryBlobStore::new());
  let config = QueueConfig::default().poll_interval(Duration::from_millis(10));
  let dispatcher = Dispatcher::new(
    DispatcherContext {
      ledger: ledger.clone(),
      queue: queue.clone(),
      limits: limits.clone(),
      notifications: Arc::new(MemoryNotificationChannel::new()),
      mirror: None,
    },
    config.clone(),
  );
  let drainer = Arc::new(Drainer::new(
    ledger.clone(),
    queue.clone(),
    limits,
    config.clone(),
  ));
  let waiter = WaitCoordinator::new(queue.clone(), ledger.clone(), blobs.clone(), config);
  Stack {
    dispatcher,
    drainer,
    waiter,
    queue,
    blobs,
    ledger,
  }
}

/// 准入作业的提交等待往返
/// Submit-wait round trip for an admitted job
#[tokio::test]
async fn test_wait_after_admitted_submission() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 2));
  let job = ScrapeJob::single_url("t", "https://a.example");
  let job_id = job.id.clone();

  let handle = s
    .dispatcher
    .submit_one(job, DispatchOptions::default())
    .await
    .unwrap()
    .unwrap();

  // 后台工作者完成作业
  // A background worker completes the job
  let queue = s.queue.clone();
  let worker_job = handle.job_id.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(30)).await;
    queue
      .complete(
        &worker_job,
        vec![Document::markdown("https://a.example", "# result")],
      )
      .await;
  });

  let documents = s.waiter.wait_for_job(&job_id, None).await.unwrap();
  assert_eq!(documents[0].markdown.as_deref(), Some("# result"));
}

/// 被暂存的作业在排空后对等待方可见
/// A parked job becomes visible to the waiter once drained
#[tokio::test]
async fn test_wait_spans_deferral_and_drain() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 1));

  let first = ScrapeJob::single_url("t", "https://running.example");
  let first_id = first.id.clone();
  s.dispatcher
    .submit_one(first, DispatchOptions::default())
    .await
    .unwrap();

  let parked = ScrapeJob::single_url("t", "https://parked.example");
  let parked_id = parked.id.clone();
  assert!(s
    .dispatcher
    .submit_one(parked, DispatchOptions::default())
    .await
    .unwrap()
    .is_none());

  // 第一个作业完成 → 排空提升第二个 → 工作者完成它
  // First job completes → drain promotes the second → a worker finishes it
  let queue = s.queue.clone();
  let drainer = s.drainer.clone();
  let bg_first = first_id.clone();
  let bg_parked = parked_id.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(30)).await;
    queue.complete(&bg_first, vec![]).await;
    drainer.release_job("t", None, &bg_first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    queue
      .complete(
        &bg_parked,
        vec![Document::markdown("https://parked.example", "# drained")],
      )
      .await;
  });

  let documents = s
    .waiter
    .wait_for_job(&parked_id, Some(Duration::from_secs(5)))
    .await
    .unwrap();
  assert_eq!(documents[0].markdown.as_deref(), Some("# drained"));
}

/// 在作业可见前等待一个极短的超时
/// Waiting with a tiny timeout before the job is visible
#[tokio::test]
async fn test_wait_times_out_in_queue_before_materialization() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 0));

  // 上限为 0：作业必然被暂存，不会出现在队列中
  // Ceiling 0: the job is guaranteed to park and never materialize
  let job = ScrapeJob::single_url("t", "https://parked.example");
  let job_id = job.id.clone();
  assert!(s
    .dispatcher
    .submit_one(job, DispatchOptions::default())
    .await
    .unwrap()
    .is_none());

  let err = s
    .waiter
    .wait_for_job(&job_id, Some(Duration::from_millis(200)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ScrapeTimeoutInQueue));
  // 没有发生外部存储回退
  // No blob store fallback happened
  assert!(!s.blobs.contains(&job_id).await);
}

/// 停放超时的作业经由墓碑让等待方立刻失败
/// A job that timed out while parked fails the waiter promptly via its
/// tombstone
#[tokio::test]
async fn test_wait_sees_drain_timeout() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 5));

  // 直接注入一个早已超过停放截止时间的条目
  // Inject an entry already past its hold deadline
  let job = ScrapeJob::single_url("t", "https://stale.example");
  let job_id = job.id.clone();
  let past = chrono::Utc::now() - chrono::Duration::seconds(120);
  let entry = scrapeq::job::DeferredEntry::new(
    job,
    DispatchOptions::default(),
    past,
    Some(Duration::from_secs(60)),
  );
  s.ledger.push_deferred("t", &entry).await.unwrap();

  s.drainer.drain_team("t").await.unwrap();

  let err = s
    .waiter
    .wait_for_job(&job_id, Some(Duration::from_secs(30)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ScrapeTimeoutInQueue));
}

/// 越界结果经由外部存储返回；零数据保留作业读取后清除
/// An out-of-band result returns via the blob store; a zero data retention
/// job purges it after the read
#[tokio::test]
async fn test_wait_with_out_of_band_result() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 2));
  let job = ScrapeJob::single_url("t", "https://big.example").with_zero_data_retention();
  let job_id = job.id.clone();

  s.dispatcher
    .submit_one(job, DispatchOptions::default())
    .await
    .unwrap();
  s.blobs
    .put(&job_id, vec![Document::markdown("https://big.example", "# oob")])
    .await;
  s.queue.complete_out_of_band(&job_id).await;

  let documents = s.waiter.wait_for_job(&job_id, None).await.unwrap();
  assert_eq!(documents[0].markdown.as_deref(), Some("# oob"));
  assert!(!s.blobs.contains(&job_id).await);
}

/// 结构化错误跨队列边界无损往返
/// A structured error round-trips the queue boundary without loss
#[tokio::test]
async fn test_wait_propagates_worker_error_shape() {
  let s = stack(StaticTenantLimits::new().with_ceiling("t", 2));
  let job = ScrapeJob::single_url("t", "https://fail.example");
  let job_id = job.id.clone();
  s.dispatcher
    .submit_one(job, DispatchOptions::default())
    .await
    .unwrap();

  let original = TransportableError::new("proxy_banned", "upstream rejected the exit node")
    .with_cause(TransportableError::new("http_status", "403"));
  s.queue.fail(&job_id, &original.to_wire()).await;

  match s.waiter.wait_for_job(&job_id, None).await.unwrap_err() {
    Error::Transportable(rebuilt) => assert_eq!(rebuilt, original),
    other => panic!("expected transportable error, got {other:?}"),
  }
}
