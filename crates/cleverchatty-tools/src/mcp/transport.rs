//! MCP transports: stdio child process, SSE, and HTTP streaming.
//!
//! Every transport moves newline-free JSON-RPC strings in both directions:
//! `send` pushes one outbound message, inbound messages arrive on the mpsc
//! receiver handed back from `start`. Framing differences (lines on a pipe,
//! SSE data fields, streamed POST bodies) stay inside this module.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::error::{Result, ToolsError};

/// How many inbound messages may queue before the reader blocks.
const INBOUND_BUFFER: usize = 64;

/// How long `send` waits for the SSE endpoint announcement.
const ENDPOINT_WAIT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    HttpStreaming {
        url: String,
        headers: HashMap<String, String>,
    },
}

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send(&self, message: String) -> Result<()>;
    /// Tear down the underlying connection/process.
    async fn shutdown(&self);
}

/// Start a transport; returns the outbound half and the inbound stream.
pub async fn start(
    config: TransportConfig,
) -> Result<(Box<dyn McpTransport>, mpsc::Receiver<String>)> {
    match config {
        TransportConfig::Stdio { command, args, env } => start_stdio(command, args, env).await,
        TransportConfig::Sse { url, headers } => start_sse(url, headers).await,
        TransportConfig::HttpStreaming { url, headers } => start_http_streaming(url, headers),
    }
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| ToolsError::Transport(format!("stdin write: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ToolsError::Transport(format!("stdin write: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ToolsError::Transport(format!("stdin flush: {e}")))?;
        Ok(())
    }

    async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "stdio child already gone");
        }
    }
}

async fn start_stdio(
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
) -> Result<(Box<dyn McpTransport>, mpsc::Receiver<String>)> {
    let mut child = Command::new(&command)
        .args(&args)
        .envs(&env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolsError::Transport(format!("spawn '{command}': {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ToolsError::Transport("child stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolsError::Transport("child stdout unavailable".to_string()))?;

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if tx.send(trimmed.to_string()).await.is_err() {
                break;
            }
        }
        debug!("stdio transport reader finished");
    });

    Ok((
        Box::new(StdioTransport {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
        }),
        rx,
    ))
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

struct SseTransport {
    client: reqwest::Client,
    headers: HashMap<String, String>,
    /// POST endpoint announced by the server's first `endpoint` event.
    post_url: watch::Receiver<Option<String>>,
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, message: String) -> Result<()> {
        let mut rx = self.post_url.clone();
        let url = tokio::time::timeout(
            std::time::Duration::from_secs(ENDPOINT_WAIT_SECS),
            async move {
                loop {
                    let current = rx.borrow().clone();
                    if let Some(url) = current {
                        return url;
                    }
                    if rx.changed().await.is_err() {
                        return String::new();
                    }
                }
            },
        )
        .await
        .map_err(|_| ToolsError::Timeout {
            what: "SSE endpoint announcement".to_string(),
        })?;
        if url.is_empty() {
            return Err(ToolsError::Transport("SSE stream closed before endpoint".to_string()));
        }

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v);
        }
        let resp = builder.send().await.map_err(|e| ToolsError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolsError::Transport(format!(
                "SSE post returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

async fn start_sse(
    url: String,
    headers: HashMap<String, String>,
) -> Result<(Box<dyn McpTransport>, mpsc::Receiver<String>)> {
    let client = reqwest::Client::new();

    let mut builder = client.get(&url).header("accept", "text/event-stream");
    for (k, v) in &headers {
        builder = builder.header(k.as_str(), v);
    }
    let resp = builder
        .send()
        .await
        .map_err(|e| ToolsError::Transport(format!("SSE connect: {e}")))?;
    if !resp.status().is_success() {
        return Err(ToolsError::Transport(format!(
            "SSE connect returned {}",
            resp.status()
        )));
    }

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    let (endpoint_tx, endpoint_rx) = watch::channel(None::<String>);
    let base_url = url.clone();

    tokio::spawn(async move {
        let mut events = resp.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(ev) => {
                    if ev.event == "endpoint" {
                        let resolved = resolve_endpoint(&base_url, &ev.data);
                        let _ = endpoint_tx.send(Some(resolved));
                    } else if !ev.data.is_empty() {
                        if tx.send(ev.data).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SSE stream error");
                    break;
                }
            }
        }
        debug!("SSE transport reader finished");
    });

    Ok((
        Box::new(SseTransport {
            client,
            headers,
            post_url: endpoint_rx,
        }),
        rx,
    ))
}

/// The endpoint event's data may be absolute or relative to the SSE URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    // take scheme://host[:port] from the base URL
    let origin = base
        .find("://")
        .and_then(|i| base[i + 3..].find('/').map(|j| &base[..i + 3 + j]))
        .unwrap_or(base);
    if endpoint.starts_with('/') {
        format!("{origin}{endpoint}")
    } else {
        format!("{origin}/{endpoint}")
    }
}

// ---------------------------------------------------------------------------
// HTTP streaming
// ---------------------------------------------------------------------------

struct HttpStreamingTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    inbound: mpsc::Sender<String>,
}

#[async_trait]
impl McpTransport for HttpStreamingTransport {
    async fn send(&self, message: String) -> Result<()> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .body(message);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v);
        }
        let resp = builder.send().await.map_err(|e| ToolsError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolsError::Transport(format!(
                "streaming post returned {}",
                resp.status()
            )));
        }

        let is_event_stream = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        let inbound = self.inbound.clone();
        if is_event_stream {
            // Drain the response stream in the background so slow responses
            // don't stall the next send.
            tokio::spawn(async move {
                let mut events = resp.bytes_stream().eventsource();
                while let Some(Ok(ev)) = events.next().await {
                    if !ev.data.is_empty() && inbound.send(ev.data).await.is_err() {
                        break;
                    }
                }
            });
        } else {
            let body = resp
                .text()
                .await
                .map_err(|e| ToolsError::Transport(e.to_string()))?;
            if !body.trim().is_empty() {
                let _ = inbound.send(body.trim().to_string()).await;
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

fn start_http_streaming(
    url: String,
    headers: HashMap<String, String>,
) -> Result<(Box<dyn McpTransport>, mpsc::Receiver<String>)> {
    let client = reqwest::Client::new();
    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

    // Continuous-listening GET stream carries server-initiated messages
    // (notifications) outside any request/response exchange.
    {
        let client = client.clone();
        let url = url.clone();
        let headers = headers.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut builder = client.get(&url).header("accept", "text/event-stream");
            for (k, v) in &headers {
                builder = builder.header(k.as_str(), v);
            }
            match builder.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let mut events = resp.bytes_stream().eventsource();
                    while let Some(Ok(ev)) = events.next().await {
                        if !ev.data.is_empty() && tx.send(ev.data).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(resp) => {
                    // Many servers only speak request/response; that's fine.
                    debug!(status = %resp.status(), "streaming listen channel refused");
                }
                Err(e) => warn!(error = %e, "streaming listen channel failed"),
            }
        });
    }

    Ok((
        Box::new(HttpStreamingTransport {
            client,
            url,
            headers,
            inbound: tx,
        }),
        rx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            resolve_endpoint("http://host:9000/sse", "/messages?id=1"),
            "http://host:9000/messages?id=1"
        );
        assert_eq!(
            resolve_endpoint("http://host/sse", "https://other/post"),
            "https://other/post"
        );
    }
}
