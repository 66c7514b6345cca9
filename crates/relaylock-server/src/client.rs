//! Client sessions
//!
//! One task per client connection. Frames are newline terminated. `ON`
//! retries until its timeout runs out, `OFF` is answered with silence, and
//! anything the session cannot serve ends the connection with `ERR`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relaylock_api::{ClientRequest, ClientResponse, Message};
use relaylock_consistency::Lock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::server::Server;
use crate::startup::ShutdownSignal;

/// What the session does after handling one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Silent,
    Reply(ClientResponse),
    /// Send the response, then close the connection
    Fail(ClientResponse),
}

pub struct ClientSession {
    id: String,
    server: Arc<Server>,
    held: HashSet<String>,
}

impl ClientSession {
    /// `id` becomes the lock owner; an empty id gets a random one
    pub fn new(server: Arc<Server>, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id
        };
        Self {
            id,
            server,
            held: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Locks granted to this session and not yet released
    pub fn held_locks(&self) -> &HashSet<String> {
        &self.held
    }

    pub async fn run<S>(mut self, stream: S, shutdown: ShutdownSignal)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!(client = %self.id, "Client connected");
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.wait() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(client = %self.id, error = %e, "Client read failed");
                    break;
                }
            };

            match self.incoming(&line).await {
                Outcome::Silent => {}
                Outcome::Reply(response) => {
                    if let Err(e) = write_response(&mut writer, &response).await {
                        debug!(client = %self.id, error = %e, "Client write failed");
                        break;
                    }
                }
                Outcome::Fail(response) => {
                    let _ = write_response(&mut writer, &response).await;
                    break;
                }
            }
        }

        self.close().await;
        let _ = writer.shutdown().await;
    }

    /// Handle one request frame
    pub async fn incoming(&mut self, line: &str) -> Outcome {
        let request = match self.server.registry().client.decode(line.as_bytes()) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %self.id, error = %e, "Invalid client frame");
                return Outcome::Fail(ClientResponse::err(e.to_string()));
            }
        };
        debug!(client = %self.id, ?request, "Client request");

        match request {
            ClientRequest::Hello { version, nonce } => {
                info!(client = %self.id, %version, "Client said hello");
                Outcome::Reply(ClientResponse::hello(
                    nonce,
                    self.server.id(),
                    self.server.version(),
                ))
            }
            ClientRequest::On {
                lock,
                timeout,
                nonce,
            } => match self.acquire(&lock, timeout).await {
                Some(granted) => {
                    metrics::counter!("relaylock_client_acquisitions_total", "outcome" => "granted")
                        .increment(1);
                    self.held.insert(lock);
                    Outcome::Reply(ClientResponse::give(nonce, granted.fence))
                }
                None => {
                    metrics::counter!("relaylock_client_acquisitions_total", "outcome" => "timeout")
                        .increment(1);
                    Outcome::Fail(ClientResponse::err(format!("timed out acquiring {}", lock)))
                }
            },
            ClientRequest::Off { lock, .. } => {
                if let Err(e) = self.server.release(&self.id, &lock).await {
                    warn!(client = %self.id, lock = %lock, error = %e, "Release failed");
                }
                self.held.remove(&lock);
                Outcome::Silent
            }
            other => Outcome::Fail(ClientResponse::err(format!(
                "Unsupported keyword: {}",
                other.keyword()
            ))),
        }
    }

    async fn acquire(&self, name: &str, timeout: Duration) -> Option<Lock> {
        let deadline = Instant::now() + timeout;
        let retry_interval = self.server.config().retry_interval;

        loop {
            match self.server.acquire_distributed(&self.id, name, timeout).await {
                Ok(Some(lock)) => return Some(lock),
                Ok(None) => {}
                Err(e) => {
                    warn!(client = %self.id, lock = %name, error = %e, "Acquire failed");
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(retry_interval.min(deadline - now)).await;
        }
    }

    /// Release every lock still held by this session
    pub async fn close(&mut self) {
        for lock in self.held.drain() {
            if let Err(e) = self.server.release(&self.id, &lock).await {
                debug!(client = %self.id, lock = %lock, error = %e, "Release on close failed");
            }
        }
        info!(client = %self.id, "Client disconnected");
    }
}

pub async fn handle_client<S>(server: Arc<Server>, stream: S, id: String, shutdown: ShutdownSignal)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    ClientSession::new(server, id).run(stream, shutdown).await
}

/// Answer a connection we will not serve with `ERR <reason>` and drop it
pub async fn reject_client(mut stream: TcpStream, peer: SocketAddr, reason: &'static str) {
    info!(client = %peer, reason, "Rejecting client");
    let _ = write_response(&mut stream, &ClientResponse::err(reason)).await;
    let _ = stream.shutdown().await;
}

async fn write_response<W>(writer: &mut W, response: &ClientResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = response.to_bytes();
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await
}
