//! Artifact sources
//!
//! An [`Artifact`] is an installable payload (a raw binary or an OS package
//! payload) streamed from a remote location, together with the checksum it was
//! published with. Artifacts fetched without a checksum are created through
//! [`Artifact::unverified`] and report [`Artifact::is_verified`] as `false`,
//! so reduced trust is always visible to the caller.
//!
//! Every fetch runs under a [`FetchContext`]: a cancellation token plus a
//! deadline. Cancellation surfaces as [`Error::Cancelled`]; an elapsed
//! deadline surfaces as a [`TransportError::Timeout`].

mod package;
mod platform;

pub use package::{Package, PackageManager, PackageManagerKind, SystemPackageManager};
pub use platform::{CapabilityTable, Platform, PlatformSupport};

#[cfg(test)]
pub use package::MockPackageManager;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;
use crate::{Error, Result};

/// Stable identifier of an installable unit
///
/// Serialized as its string form. Identifiers this build does not know are
/// kept as [`ComponentId::Other`] so a ledger written by another version
/// round-trips unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentId {
    /// Network filtering package required by kubelet and kube-proxy
    Iptables,
    /// IAM Roles Anywhere credential helper binary
    SigningHelper,
    /// Identifier not known to this build
    Other(String),
}

impl ComponentId {
    /// String form stored in the tracker
    pub fn as_str(&self) -> &str {
        match self {
            ComponentId::Iptables => "iptables",
            ComponentId::SigningHelper => "signing-helper",
            ComponentId::Other(s) => s,
        }
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        match s.as_str() {
            "iptables" => ComponentId::Iptables,
            "signing-helper" => ComponentId::SigningHelper,
            _ => ComponentId::Other(s),
        }
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        ComponentId::from(s.to_string())
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.as_str().to_string()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integrity information an artifact was published with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Checksum {
    /// Lowercase hex SHA-256 digest of the payload
    Sha256(String),
    /// No checksum is available; the payload is trusted on transport only
    Unverified,
}

/// Byte stream of an artifact payload
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Cancellable deadline that bounds one fetch
#[derive(Clone, Debug)]
pub struct FetchContext {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl FetchContext {
    /// Create a context that expires `timeout` from now
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Context with its own token, for callers that never cancel
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    /// Derive a fresh deadline that shares this context's cancellation
    pub fn renewed(&self) -> Self {
        Self::new(self.cancel.clone(), self.timeout)
    }

    /// Token that aborts operations bound to this context
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the caller has cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` until it completes, the deadline passes, or the caller
    /// cancels. The future is dropped on every exit path.
    pub async fn run<F, T>(&self, url: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(TransportError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
                .into()),
            },
        }
    }
}

/// A fetched payload and its checksum
pub struct Artifact {
    origin: String,
    body: ByteStream,
    checksum: Checksum,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("origin", &self.origin)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

impl Artifact {
    /// Wrap a stream published with a SHA-256 digest
    pub fn with_sha256(
        origin: impl Into<String>,
        body: ByteStream,
        sha256_hex: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            body,
            checksum: Checksum::Sha256(sha256_hex.into().to_ascii_lowercase()),
        }
    }

    /// Wrap a stream that has no checksum; the result is never treated as verified
    pub fn unverified(origin: impl Into<String>, body: ByteStream) -> Self {
        Self {
            origin: origin.into(),
            body,
            checksum: Checksum::Unverified,
        }
    }

    /// Where the payload came from
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Checksum the payload was published with
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Whether the payload will be checked against a digest when read
    pub fn is_verified(&self) -> bool {
        matches!(self.checksum, Checksum::Sha256(_))
    }

    /// Take the raw stream; the caller becomes responsible for verification
    pub fn into_stream(self) -> (ByteStream, Checksum) {
        (self.body, self.checksum)
    }

    /// Read the whole payload under `ctx`, verifying the digest if one was published
    pub async fn into_bytes(self, ctx: &FetchContext) -> Result<Vec<u8>> {
        let Artifact {
            origin,
            mut body,
            checksum,
        } = self;

        let url = origin.clone();
        let bytes = ctx
            .run(&url, async move {
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await.map_err(|e| {
                    Error::from(TransportError::Connection {
                        url: origin,
                        message: e.to_string(),
                    })
                })?;
                Ok(buf)
            })
            .await?;

        if let Checksum::Sha256(expected) = &checksum {
            let actual = hex::encode(Sha256::digest(&bytes));
            if &actual != expected {
                return Err(Error::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        debug!(url = %url, bytes = bytes.len(), verified = matches!(checksum, Checksum::Sha256(_)), "Artifact read");
        Ok(bytes)
    }

    /// Drop the payload without reading it
    pub fn discard(self) {
        drop(self.body);
    }
}

/// Something that can hand out an artifact
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the artifact; exactly one remote attempt per call
    async fn fetch(&self, ctx: &FetchContext) -> Result<Artifact>;
}

/// Artifact served over HTTP(S) at a fixed URL
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    sha256: Option<String>,
}

impl HttpSource {
    /// Source for a URL with no published checksum
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            sha256: None,
        }
    }

    /// Source for a URL published with a SHA-256 digest
    pub fn with_sha256(
        client: reqwest::Client,
        url: impl Into<String>,
        sha256_hex: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            sha256: Some(sha256_hex.into()),
        }
    }

    /// URL this source fetches
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, ctx: &FetchContext) -> Result<Artifact> {
        let body = fetch_url(&self.client, &self.url, ctx).await?;
        Ok(match &self.sha256 {
            Some(sum) => Artifact::with_sha256(&self.url, body, sum),
            None => Artifact::unverified(&self.url, body),
        })
    }
}

/// Issue one GET for `url` under `ctx` and return the response body stream
///
/// Non-success statuses return [`TransportError::Status`] and no stream.
pub async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    ctx: &FetchContext,
) -> Result<ByteStream> {
    debug!(url = %url, "Fetching artifact");
    let response = ctx
        .run(url, async {
            client.get(url).send().await.map_err(|e| {
                Error::from(TransportError::Connection {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            })
        })
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }

    let stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let body: ByteStream = Box::pin(StreamReader::new(stream));
    Ok(body)
}

/// Build the HTTP client used for artifact downloads
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::configuration(format!("failed to build HTTP client: {}", e)))
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP stub for fetch tests

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::Router;

    /// A running stub server and its request counter
    pub struct StubServer {
        pub addr: SocketAddr,
        pub hits: Arc<AtomicUsize>,
    }

    impl StubServer {
        pub fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Serve `body` with `status` on every path
    pub async fn serve(status: u16, body: &'static str) -> StubServer {
        serve_with_delay(status, body, std::time::Duration::ZERO).await
    }

    /// Like [`serve`], but wait `delay` before answering
    pub async fn serve_with_delay(
        status: u16,
        body: &'static str,
        delay: std::time::Duration,
    ) -> StubServer {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let status = StatusCode::from_u16(status).expect("valid status");

        let handler = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                (status, body)
            }
        };
        let app = Router::new().fallback(handler);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Stub server failed");
        });

        StubServer { addr, hits }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::{serve, serve_with_delay};
    use super::*;

    fn client() -> reqwest::Client {
        default_client().expect("client")
    }

    // ==========================================================================
    // Story: Fetching artifacts over HTTP
    // ==========================================================================

    /// A body without a checksum is handed back intact and marked unverified
    #[tokio::test]
    async fn checksum_less_fetch_returns_exact_body_marked_unverified() {
        let server = serve(200, "BINARYDATA").await;
        let source = HttpSource::new(client(), server.url("/helper"));
        let ctx = FetchContext::with_timeout(Duration::from_secs(10));

        let artifact = source.fetch(&ctx).await.expect("fetch should succeed");
        assert!(!artifact.is_verified());
        assert_eq!(artifact.checksum(), &Checksum::Unverified);

        let bytes = artifact.into_bytes(&ctx).await.expect("read body");
        assert_eq!(bytes, b"BINARYDATA");
    }

    /// A 404 is a transport error carrying the status; no stream is returned
    #[tokio::test]
    async fn not_found_yields_status_error_without_stream() {
        let server = serve(404, "missing").await;
        let source = HttpSource::new(client(), server.url("/helper"));
        let ctx = FetchContext::with_timeout(Duration::from_secs(10));

        match source.fetch(&ctx).await {
            Err(Error::Transport(t)) => {
                assert_eq!(t.status(), Some(404));
                assert_eq!(t.url(), server.url("/helper"));
            }
            other => panic!("Expected 404 transport error, got {other:?}"),
        }
        assert_eq!(server.hits(), 1);
    }

    /// Published digests are enforced when the body is read
    #[tokio::test]
    async fn sha256_is_checked_when_reading() {
        let server = serve(200, "BINARYDATA").await;
        let good = hex::encode(Sha256::digest(b"BINARYDATA"));
        let ctx = FetchContext::with_timeout(Duration::from_secs(10));

        let artifact = HttpSource::with_sha256(client(), server.url("/a"), good.to_uppercase())
            .fetch(&ctx)
            .await
            .expect("fetch");
        assert!(artifact.is_verified());
        assert_eq!(artifact.into_bytes(&ctx).await.expect("digest matches"), b"BINARYDATA");

        let artifact = HttpSource::with_sha256(client(), server.url("/a"), "00".repeat(32))
            .fetch(&ctx)
            .await
            .expect("fetch");
        match artifact.into_bytes(&ctx).await {
            Err(Error::ChecksumMismatch { actual, .. }) => assert_eq!(actual, good),
            other => panic!("Expected checksum mismatch, got {other:?}"),
        }
    }

    /// Refused connections are transport errors, not cancellations
    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let source = HttpSource::new(client(), format!("http://{}/x", addr));
        let ctx = FetchContext::with_timeout(Duration::from_secs(10));
        match source.fetch(&ctx).await {
            Err(Error::Transport(TransportError::Connection { .. })) => {}
            other => panic!("Expected connection error, got {other:?}"),
        }
    }

    // ==========================================================================
    // Story: Deadlines and cancellation
    // ==========================================================================

    /// A slow server trips the deadline
    #[tokio::test]
    async fn slow_server_times_out() {
        let server = serve_with_delay(200, "late", Duration::from_secs(5)).await;
        let source = HttpSource::new(client(), server.url("/slow"));
        let ctx = FetchContext::with_timeout(Duration::from_millis(100));

        match source.fetch(&ctx).await {
            Err(Error::Transport(TransportError::Timeout { .. })) => {}
            other => panic!("Expected timeout, got {other:?}"),
        }
    }

    /// Operator cancellation is distinguishable from a broken network
    #[tokio::test]
    async fn cancellation_during_fetch_is_reported_as_cancelled() {
        let server = serve_with_delay(200, "late", Duration::from_secs(5)).await;
        let source = HttpSource::new(client(), server.url("/slow"));
        let ctx = FetchContext::with_timeout(Duration::from_secs(30));

        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        match source.fetch(&ctx).await {
            Err(Error::Cancelled) => {}
            other => panic!("Expected cancellation, got {other:?}"),
        }
    }

    /// An already-cancelled context never reaches the network
    #[tokio::test]
    async fn cancelled_context_issues_no_request() {
        let server = serve(200, "BINARYDATA").await;
        let ctx = FetchContext::with_timeout(Duration::from_secs(10));
        ctx.cancel_token().cancel();

        let result = HttpSource::new(client(), server.url("/x")).fetch(&ctx).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(server.hits(), 0);
    }

    #[test]
    fn component_ids_round_trip_through_strings() {
        assert_eq!(ComponentId::from("iptables"), ComponentId::Iptables);
        assert_eq!(ComponentId::from("signing-helper"), ComponentId::SigningHelper);
        assert_eq!(
            ComponentId::from("containerd"),
            ComponentId::Other("containerd".to_string())
        );
        assert_eq!(String::from(ComponentId::SigningHelper), "signing-helper");
    }

    #[test]
    fn discard_consumes_artifact() {
        let artifact = Artifact::unverified("mem://x", Box::pin(&b"abc"[..]));
        assert_eq!(artifact.origin(), "mem://x");
        artifact.discard();
    }
}
