//! [`Engine`] backed by an external `xray` binary.
//!
//! Each instance is one child process fed a full configuration on stdin: a
//! SOCKS inbound on a free loopback port plus the outbound under test.
//! Requests go through that inbound with `socks5h://`, so name resolution
//! also happens on the far side of the tunnel.

use crate::constants::probe::START_TIMEOUT;
use crate::engine::{Engine, Instance, ProbeRequest, ProbeResponse};
use crate::error::ProbeError;
use crate::outbound::Outbound;
use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const LOOPBACK: &str = "127.0.0.1";
const READY_POLL: Duration = Duration::from_millis(50);

/// Starts one `xray run -config stdin:` process per instance.
#[derive(Debug, Clone)]
pub struct XrayEngine {
    binary: PathBuf,
    verbose: bool,
}

impl XrayEngine {
    /// Engine using the `xray` binary at `binary`.
    ///
    /// With `verbose` the child logs at debug level to the inherited stdio;
    /// otherwise its output is discarded.
    pub fn new(binary: impl Into<PathBuf>, verbose: bool) -> Self {
        XrayEngine {
            binary: binary.into(),
            verbose,
        }
    }
}

impl Default for XrayEngine {
    fn default() -> Self {
        XrayEngine::new("xray", false)
    }
}

/// Full engine document: loopback SOCKS inbound and the outbound under test.
fn engine_config(outbound: &Outbound, port: u16, verbose: bool) -> serde_json::Value {
    json!({
        "log": { "loglevel": if verbose { "debug" } else { "none" } },
        "inbounds": [{
            "tag": "socks-in",
            "listen": LOOPBACK,
            "port": port,
            "protocol": "socks",
            "settings": { "auth": "noauth", "udp": true },
        }],
        "outbounds": [outbound],
    })
}

/// Asks the OS for a free loopback port. The listener is dropped right away so
/// the child can bind it.
fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind((LOOPBACK, 0))?;
    Ok(listener.local_addr()?.port())
}

fn start_failed(context: &str, err: impl std::fmt::Display) -> ProbeError {
    ProbeError::StartFailed(format!("{}: {}", context, err))
}

/// Polls the inbound port until it accepts connections or the child dies.
async fn wait_ready(child: &mut Child, port: u16) -> Result<(), ProbeError> {
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| start_failed("engine wait", e))?
        {
            return Err(ProbeError::StartFailed(format!("engine exited early: {}", status)));
        }
        if TcpStream::connect((LOOPBACK, port)).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

#[async_trait]
impl Engine for XrayEngine {
    async fn start(
        &self,
        outbound: &Outbound,
        allow_insecure: bool,
    ) -> Result<Box<dyn Instance>, ProbeError> {
        let port = reserve_port().map_err(|e| start_failed("reserve port", e))?;
        let config = serde_json::to_vec(&engine_config(outbound, port, self.verbose))
            .map_err(|e| start_failed("encode config", e))?;

        let output = || {
            if self.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let mut child = Command::new(&self.binary)
            .args(["run", "-config", "stdin:"])
            .stdin(Stdio::piped())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| start_failed(&self.binary.display().to_string(), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&config)
                .await
                .map_err(|e| start_failed("write config", e))?;
            // dropping stdin closes it so the engine stops reading
        }

        match tokio::time::timeout(START_TIMEOUT, wait_ready(&mut child, port)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let _ = child.kill().await;
                return Err(ProbeError::StartFailed(format!(
                    "inbound {}:{} not ready after {:?}",
                    LOOPBACK, port, START_TIMEOUT
                )));
            }
        }
        debug!("engine up on {}:{} (pid {:?})", LOOPBACK, port, child.id());

        let proxy = reqwest::Proxy::all(format!("socks5h://{}:{}", LOOPBACK, port))
            .map_err(|e| start_failed("proxy", e))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|e| start_failed("http client", e))?;

        Ok(Box::new(XrayInstance {
            child: Some(child),
            client,
        }))
    }
}

/// Running `xray` child plus a client routed through its inbound.
struct XrayInstance {
    child: Option<Child>,
    client: reqwest::Client,
}

impl XrayInstance {
    async fn send(
        &self,
        request: &ProbeRequest,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let no_response = |e: reqwest::Error| ProbeError::NoResponse(e.to_string());

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        if let Some(payload) = &request.body {
            let chunks = futures::stream::iter(payload.chunks().map(Ok::<_, std::io::Error>));
            builder = builder
                .header(reqwest::header::CONTENT_LENGTH, payload.len())
                .body(reqwest::Body::wrap_stream(chunks));
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(no_response)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(no_response)?;
        let elapsed = started.elapsed();

        Ok(ProbeResponse {
            elapsed,
            status,
            body: String::from_utf8(bytes.to_vec()).ok(),
        })
    }
}

#[async_trait]
impl Instance for XrayInstance {
    async fn request(
        &self,
        request: &ProbeRequest,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        tokio::time::timeout(timeout, self.send(request, timeout))
            .await
            .map_err(|_| ProbeError::NoResponse(format!("timed out after {:?}", timeout)))?
    }

    async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("engine already gone: {}", e);
            }
        }
    }
}
