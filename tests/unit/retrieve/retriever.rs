use super::*;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicUsize;

use crate::catalog::model::OriginKind;
use crate::foundation::core::Token;
use crate::foundation::error::RetrievalErrorKind;

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "glossreel_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

/// Transport replaying a fixed list of outcomes, then failing with not_found.
#[derive(Default)]
struct Scripted {
    outcomes: parking_lot::Mutex<VecDeque<Result<Vec<u8>, RetrievalError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(outcomes: Vec<Result<Vec<u8>, RetrievalError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: parking_lot::Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OriginTransport for Scripted {
    async fn fetch(&self, _descriptor: &MediaDescriptor) -> Result<FetchedMedia, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.outcomes.lock().pop_front();
        match next {
            Some(Ok(bytes)) => Ok(FetchedMedia::new(bytes)),
            Some(Err(e)) => Err(e),
            None => Err(RetrievalError::not_found("script exhausted")),
        }
    }
}

fn descriptor(origin_id: &str, kind: OriginKind) -> MediaDescriptor {
    MediaDescriptor {
        token: Token::new("HELLO").unwrap(),
        origin_id: origin_id.to_string(),
        origin_kind: kind,
        source_rank: 0,
        locator: format!("https://media.test/{origin_id}.mp4"),
    }
}

fn retriever(
    root: &Path,
    capacity: u64,
    transport: Arc<Scripted>,
    retry: RetryPolicy,
) -> Retriever {
    let cache = Arc::new(CacheStore::open(root, capacity).unwrap());
    Retriever::new(
        cache,
        Origins::new().with_direct(transport),
        retry,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let root = temp_dir("retriever_cache_hit");
    let transport = Scripted::new(vec![Ok(b"clip".to_vec())]);
    let r = retriever(&root, 1024, transport.clone(), RetryPolicy::immediate(3));
    let d = descriptor("v1", OriginKind::DirectTransfer);

    let first = r.fetch(&d).await.unwrap();
    let second = r.fetch(&d).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(std::fs::read(&second).unwrap(), b"clip");
    assert_eq!(transport.calls(), 1);
    assert_eq!(
        r.stats(),
        RetrieverStats {
            cache_hits: 1,
            origin_fetches: 1
        }
    );

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let root = temp_dir("retriever_transient");
    let transport = Scripted::new(vec![
        Err(RetrievalError::transient("reset")),
        Err(RetrievalError::timeout("slow")),
        Ok(b"ok".to_vec()),
    ]);
    let r = retriever(&root, 1024, transport.clone(), RetryPolicy::immediate(3));

    let path = r
        .fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"ok");
    assert_eq!(transport.calls(), 3);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn retries_stop_at_the_attempt_budget() {
    let root = temp_dir("retriever_budget");
    let transport = Scripted::new(vec![
        Err(RetrievalError::transient("a")),
        Err(RetrievalError::transient("b")),
        Err(RetrievalError::transient("c")),
        Ok(b"too late".to_vec()),
    ]);
    let r = retriever(&root, 1024, transport.clone(), RetryPolicy::immediate(3));

    let err = r
        .fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::TransientNetwork);
    assert_eq!(transport.calls(), 3);
    assert!(!r.cache().contains("v1"));

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let root = temp_dir("retriever_not_found");
    let transport = Scripted::new(vec![
        Err(RetrievalError::not_found("404")),
        Ok(b"never".to_vec()),
    ]);
    let r = retriever(&root, 1024, transport.clone(), RetryPolicy::immediate(3));

    let err = r
        .fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::NotFound);
    assert_eq!(transport.calls(), 1);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn kind_without_transport_is_unsupported() {
    let root = temp_dir("retriever_unsupported");
    let transport = Scripted::new(vec![Ok(b"x".to_vec())]);
    let r = retriever(&root, 1024, transport.clone(), RetryPolicy::immediate(3));

    let err = r
        .fetch(&descriptor("yt1", OriginKind::PlatformHosted))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::UnsupportedOrigin);
    assert_eq!(transport.calls(), 0);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn slow_attempts_time_out() {
    let root = temp_dir("retriever_timeout");
    let transport = Arc::new(Scripted {
        outcomes: parking_lot::Mutex::new(vec![Ok(b"x".to_vec()), Ok(b"x".to_vec())].into()),
        delay: Duration::from_secs(10),
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(CacheStore::open(&root, 1024).unwrap());
    let r = Retriever::new(
        cache,
        Origins::new().with_direct(transport.clone()),
        RetryPolicy::immediate(2),
        Duration::from_millis(50),
    );

    let err = r
        .fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::Timeout);
    assert_eq!(transport.calls(), 2);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn backoff_waits_between_attempts() {
    let root = temp_dir("retriever_backoff");
    let transport = Scripted::new(vec![Err(RetrievalError::transient("a")), Ok(b"x".to_vec())]);
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(40),
    };
    let r = retriever(&root, 1024, transport, policy);

    let started = std::time::Instant::now();
    r.fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn cache_rejection_is_a_storage_error() {
    let root = temp_dir("retriever_storage");
    let transport = Scripted::new(vec![Ok(vec![0u8; 64])]);
    let r = retriever(&root, 16, transport.clone(), RetryPolicy::immediate(3));

    let err = r
        .fetch(&descriptor("v1", OriginKind::DirectTransfer))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::Storage);
    assert_eq!(transport.calls(), 1);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

/// Serve `body` one byte per `gap` with a correct Content-Length.
async fn serve_dripping(body: &'static [u8], gap: Duration) -> String {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
        sock.write_all(head.as_bytes()).await.unwrap();
        for byte in body {
            tokio::time::sleep(gap).await;
            sock.write_all(std::slice::from_ref(byte)).await.unwrap();
            sock.flush().await.unwrap();
        }
        sock.shutdown().await.ok();
    });
    format!("http://{addr}/clip.mp4")
}

#[tokio::test]
async fn steady_download_may_outlast_the_request_timeout() {
    let root = temp_dir("retriever_drip");
    let locator = serve_dripping(b"0123456789", Duration::from_millis(300)).await;
    let cfg = RetrievalConfig {
        max_attempts: 1,
        request_timeout_secs: 1,
        ..RetrievalConfig::default()
    };
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let transfer =
        crate::retrieve::origin::DirectTransfer::with_client(client, cfg.request_timeout());
    let cache = Arc::new(CacheStore::open(&root, 1024).unwrap());
    let r = Retriever::from_config(cache, Origins::new().with_direct(Arc::new(transfer)), &cfg);

    let mut d = descriptor("drip", OriginKind::DirectTransfer);
    d.locator = locator;
    let started = std::time::Instant::now();
    let path = r.fetch(&d).await.unwrap();
    assert!(started.elapsed() > cfg.request_timeout());
    assert_eq!(std::fs::read(path).unwrap(), b"0123456789");

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn leased_fetches_pin_hits_and_downloads() {
    let root = temp_dir("retriever_lease");
    let transport = Scripted::new(vec![Ok(vec![1u8; 6]), Ok(vec![2u8; 6]), Ok(vec![2u8; 6])]);
    let r = retriever(&root, 10, transport.clone(), RetryPolicy::immediate(1));
    let lease = Arc::new(r.cache().lease());

    let first = r
        .fetch_leased(&descriptor("v1", OriginKind::DirectTransfer), &lease)
        .await
        .unwrap();
    let err = r
        .fetch_leased(&descriptor("v2", OriginKind::DirectTransfer), &lease)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RetrievalErrorKind::Storage);
    assert!(first.exists());
    assert_eq!(lease.origin_ids(), vec!["v1"]);

    drop(lease);
    r.fetch(&descriptor("v2", OriginKind::DirectTransfer))
        .await
        .unwrap();
    assert!(!r.cache().contains("v1"));
    assert!(!first.exists());
    assert_eq!(transport.calls(), 3);

    drop(r);
    std::fs::remove_dir_all(&root).ok();
}
