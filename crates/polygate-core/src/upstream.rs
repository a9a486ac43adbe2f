use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Deadline for the header exchange and idle cap for stream reads.
    pub timeout: Duration,
    pub want_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    /// Dropping the receiver cancels the upstream read task, which closes
    /// the connection.
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("upstream deadline elapsed")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Seam between the dispatcher and the network, so tests can stub the
/// upstream without sockets.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>;
}

pub struct WreqUpstreamClient {
    client: wreq::Client,
}

impl WreqUpstreamClient {
    pub fn new() -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut builder = self.client.post(&req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let response = tokio::time::timeout(req.timeout, builder.send())
                .await
                .map_err(|_| UpstreamFailure::Timeout)?
                .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;

            let status = response.status().as_u16();
            let is_success = (200..300).contains(&status);

            if !is_success || !req.want_stream {
                let body = tokio::time::timeout(req.timeout, response.bytes())
                    .await
                    .map_err(|_| UpstreamFailure::Timeout)?
                    .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;
                return Ok(UpstreamResponse {
                    status,
                    body: UpstreamBody::Bytes(body),
                });
            }

            let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
            let idle_timeout = req.timeout;
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                loop {
                    let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                    let item = match next {
                        Ok(item) => item,
                        Err(_) => break,
                    };
                    let Some(item) = item else {
                        break;
                    };
                    let chunk = match item {
                        Ok(chunk) => chunk,
                        Err(_) => break,
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            });

            Ok(UpstreamResponse {
                status,
                body: UpstreamBody::Stream(rx),
            })
        })
    }
}
