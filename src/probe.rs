//! Bounded-concurrency probe harness.
//!
//! One worker per link runs parse → build → start → measure → release. At most
//! `threads` workers are alive at once: the permit is taken before the worker
//! is spawned and dropped only after its engine instance is closed. Measured
//! results travel to the aggregating owner over a channel; a failing link only
//! ever affects itself.

use crate::Protocol;
use crate::constants::probe::{
    MAX_SPEEDTEST_AMOUNT_KB, REQUEST_TIMEOUT, SPEEDTEST_AMOUNT_KB, TARGET_URL, THREADS,
};
use crate::engine::{Engine, Instance, ProbeRequest};
use crate::error::{BuildError, OutputError, ParseError, ProbeError};
use crate::report::ProbeResult;
use crate::speedtest::{self, Direction};
use futures::FutureExt;
use log::{info, warn};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

/// Probe settings shared by every worker.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Maximum number of links probed at once.
    pub threads: usize,
    /// URL requested through each instance to measure delay.
    pub target_url: String,
    /// HTTP method of the delay request.
    pub method: reqwest::Method,
    /// Log the delay response body.
    pub show_body: bool,
    /// Skip certificate verification (fake SNI).
    pub allow_insecure: bool,
    /// Measure download and upload throughput after the delay.
    pub speedtest: bool,
    /// Speed-test payload per direction, in KB.
    pub speedtest_amount_kb: u32,
    /// Bound for each request.
    pub request_timeout: Duration,
    /// Let the engine log verbosely.
    pub verbose: bool,
}

impl ProbeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::new()
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfigBuilder::new().build()
    }
}

/// Builder for `ProbeConfig`.
#[derive(Debug, Default)]
pub struct ProbeConfigBuilder {
    threads: Option<usize>,
    target_url: Option<String>,
    method: Option<reqwest::Method>,
    show_body: bool,
    allow_insecure: bool,
    speedtest: bool,
    speedtest_amount_kb: Option<u32>,
    request_timeout: Option<Duration>,
    verbose: bool,
}

impl ProbeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent workers (at least one).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the delay-measurement URL.
    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    /// Set the delay-measurement HTTP method.
    pub fn method(mut self, method: reqwest::Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Log response bodies.
    pub fn show_body(mut self, show: bool) -> Self {
        self.show_body = show;
        self
    }

    /// Accept invalid certificates.
    pub fn allow_insecure(mut self, insecure: bool) -> Self {
        self.allow_insecure = insecure;
        self
    }

    /// Enable the speed test.
    pub fn speedtest(mut self, enabled: bool) -> Self {
        self.speedtest = enabled;
        self
    }

    /// Set the speed-test payload in KB (capped at `MAX_SPEEDTEST_AMOUNT_KB`).
    pub fn speedtest_amount_kb(mut self, amount: u32) -> Self {
        self.speedtest_amount_kb = Some(amount);
        self
    }

    /// Set the per-request bound.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Let the engine log verbosely.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProbeConfig {
        ProbeConfig {
            threads: self.threads.unwrap_or(THREADS).max(1),
            target_url: self.target_url.unwrap_or_else(|| TARGET_URL.to_string()),
            method: self.method.unwrap_or(reqwest::Method::GET),
            show_body: self.show_body,
            allow_insecure: self.allow_insecure,
            speedtest: self.speedtest,
            speedtest_amount_kb: self
                .speedtest_amount_kb
                .unwrap_or(SPEEDTEST_AMOUNT_KB)
                .min(MAX_SPEEDTEST_AMOUNT_KB),
            request_timeout: self.request_timeout.unwrap_or(REQUEST_TIMEOUT),
            verbose: self.verbose,
        }
    }
}

/// Why a link produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// The link could not be parsed
    #[error("couldn't parse the config: {0}")]
    Parse(#[source] ParseError),
    /// The outbound could not be built
    #[error("couldn't build the outbound: {0}")]
    Build(#[source] BuildError),
    /// The engine did not start
    #[error("couldn't start the engine: {0}")]
    Start(#[source] ProbeError),
    /// The delay request failed or timed out
    #[error("config didn't respond: {0}")]
    NoResponse(#[source] ProbeError),
}

impl SkipReason {
    /// Pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            SkipReason::Parse(_) => "parse",
            SkipReason::Build(_) => "build",
            SkipReason::Start(_) => "start",
            SkipReason::NoResponse(_) => "delay",
        }
    }
}

/// Result of probing one link.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The link answered
    Measured(ProbeResult),
    /// The link failed at some stage
    Skipped {
        /// Link as given
        link: String,
        /// Failing stage and cause
        reason: SkipReason,
    },
}

/// Drives links through an [`Engine`].
#[derive(Clone)]
pub struct Prober {
    engine: Arc<dyn Engine>,
    config: Arc<ProbeConfig>,
}

impl Prober {
    /// Create a prober over `engine`.
    pub fn new(engine: Arc<dyn Engine>, config: ProbeConfig) -> Self {
        Prober {
            engine,
            config: Arc::new(config),
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probes one link. The engine instance, once started, is closed exactly
    /// once, also when the measurement panics; the panic then resumes.
    pub async fn probe_one(&self, link: &str) -> Outcome {
        let skipped = |reason| Outcome::Skipped {
            link: link.to_string(),
            reason,
        };

        let protocol = match Protocol::parse(link) {
            Ok(protocol) => protocol,
            Err(e) => return skipped(SkipReason::Parse(e)),
        };
        let outbound = match protocol.build_outbound(self.config.allow_insecure) {
            Ok(outbound) => outbound,
            Err(e) => return skipped(SkipReason::Build(e)),
        };
        let mut instance = match self.engine.start(&outbound, self.config.allow_insecure).await {
            Ok(instance) => instance,
            Err(e) => return skipped(SkipReason::Start(e)),
        };

        let measured = AssertUnwindSafe(self.measure(instance.as_ref(), &protocol))
            .catch_unwind()
            .await;
        instance.close().await;

        match measured.unwrap_or_else(|panic| std::panic::resume_unwind(panic)) {
            Ok(result) => Outcome::Measured(result),
            Err(e) => skipped(SkipReason::NoResponse(e)),
        }
    }

    async fn measure(
        &self,
        instance: &dyn Instance,
        protocol: &Protocol,
    ) -> Result<ProbeResult, ProbeError> {
        let config = &self.config;
        let request = ProbeRequest::new(config.method.clone(), config.target_url.as_str());
        let response = tokio::time::timeout(
            config.request_timeout,
            instance.request(&request, config.request_timeout),
        )
        .await
        .map_err(|_| {
            ProbeError::NoResponse(format!("timed out after {:?}", config.request_timeout))
        })??;

        let delay = response.elapsed.as_millis() as u64;
        info!("{}", protocol.details().trim_end());
        info!("Real Delay: {}ms", delay);
        if config.show_body {
            info!("Response body: {}", response.body.as_deref().unwrap_or_default());
        }

        let (download, upload) = if config.speedtest {
            (
                self.throughput(instance, Direction::Download).await,
                self.throughput(instance, Direction::Upload).await,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(ProbeResult {
            link: protocol.orig_link().to_string(),
            tls: protocol.summary().tls,
            delay,
            download,
            upload,
        })
    }

    /// Throughput in one direction; a failure zeroes only this direction.
    async fn throughput(&self, instance: &dyn Instance, direction: Direction) -> f32 {
        let bytes = speedtest::payload_bytes(self.config.speedtest_amount_kb);
        match speedtest::measure(instance, direction, bytes, self.config.request_timeout).await {
            Ok(mbps) => {
                info!("{:?} {}KB: {:.2} Mbps", direction, self.config.speedtest_amount_kb, mbps);
                mbps
            }
            Err(e) => {
                warn!("{}", e);
                0.0
            }
        }
    }

    /// Probes every link and returns the measured results in completion order.
    ///
    /// Returns only after every worker has finished.
    pub async fn run(&self, links: Vec<String>) -> Vec<ProbeResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.threads));
        let (tx, mut rx) = mpsc::unbounded_channel::<ProbeResult>();
        let mut workers = JoinSet::new();

        for (index, link) in links.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let prober = self.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let outcome = prober.probe_one(&link).await;
                drop(permit);
                match outcome {
                    Outcome::Measured(result) => {
                        let _ = tx.send(result);
                    }
                    Outcome::Skipped { reason, .. } => {
                        warn!("Config Number {}: {} failed: {}", index + 1, reason.stage(), reason);
                    }
                }
            });
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("worker aborted: {}", e);
            }
        }

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }
}

/// Reads links from a file, one per line; blank lines are skipped.
///
/// # Errors
///
/// Returns `OutputError::ReadFailed` if the file cannot be read.
pub fn read_links(path: &Path) -> Result<Vec<String>, OutputError> {
    let text = std::fs::read_to_string(path).map_err(|source| OutputError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_cli_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(config.threads, 5);
        assert_eq!(config.target_url, "https://google.com/");
        assert_eq!(config.method, reqwest::Method::GET);
        assert_eq!(config.speedtest_amount_kb, 10_000);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(!config.speedtest && !config.allow_insecure && !config.show_body);
    }

    #[test]
    fn zero_threads_is_clamped() {
        assert_eq!(ProbeConfig::builder().threads(0).build().threads, 1);
    }

    #[test]
    fn speedtest_amount_is_capped() {
        let config = ProbeConfig::builder().speedtest_amount_kb(u32::MAX).build();
        assert_eq!(config.speedtest_amount_kb, MAX_SPEEDTEST_AMOUNT_KB);
        let config = ProbeConfig::builder().speedtest_amount_kb(500).build();
        assert_eq!(config.speedtest_amount_kb, 500);
    }

    #[test]
    fn read_links_skips_blank_lines() {
        let path = std::env::temp_dir().join(format!("links-{}.txt", std::process::id()));
        std::fs::write(&path, "vless://a@h:1\n\n  trojan://b@h:2  \r\n\n").unwrap();
        let links = read_links(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(links, ["vless://a@h:1", "trojan://b@h:2"]);
    }

    #[test]
    fn missing_links_file_is_read_failed() {
        assert!(matches!(
            read_links(Path::new("/nonexistent/links.txt")),
            Err(OutputError::ReadFailed { .. })
        ));
    }

    #[test]
    fn skip_reason_names_stage() {
        let reason = SkipReason::Parse(ParseError::UnrecognizedScheme("x".to_string()));
        assert_eq!(reason.stage(), "parse");
        assert!(reason.to_string().starts_with("couldn't parse the config"));
    }
}
