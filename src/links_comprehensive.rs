//! Cross-protocol link tests and probe harness tests.
//!
//! Covers, for VMess, VLESS, Trojan, Shadowsocks and WireGuard:
//! - prefix dispatch and case-insensitivity
//! - determinism and idempotent defaulting
//! - IPv6 bracketing
//! - harness fault isolation, concurrency bound, release-once, timeouts
//! - result ordering and the csv report

#![cfg(test)]

use crate::engine::{Engine, Instance, ProbeRequest, ProbeResponse};
use crate::error::{ParseError, ProbeError};
use crate::outbound::Outbound;
use crate::probe::{Outcome, ProbeConfig, Prober, SkipReason};
use crate::report::{self, ProbeResult, ReportFormat};
use crate::{Protocol, ProtocolParser, Shadowsocks, Trojan, VLess, VMess, WireGuard};
use async_trait::async_trait;
use base64::Engine as _;
use serde_test::{Token, assert_tokens};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn b64(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text)
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn prefix_case_insensitive_for_every_variant() {
    let ss_user = b64("aes-256-gcm:pass");
    let vmess_body = b64(r#"{"add":"127.0.0.1","port":443,"id":"uuid-123"}"#);
    let cases = [
        (format!("VMESS://{}", vmess_body), "vmess"),
        ("VLeSs://id@host:443".to_string(), "vless"),
        ("TROJAN://pw@host:443".to_string(), "trojan"),
        (format!("Ss://{}@host:8388", ss_user), "shadowsocks"),
        ("WireGuard://sk@host:51820".to_string(), "wireguard"),
    ];
    for (link, name) in cases {
        let p = Protocol::parse(&link);
        assert!(p.is_ok(), "{} should be accepted: {:?}", link, p);
        assert_eq!(p.unwrap().name(), name);
    }
}

#[test]
fn unknown_scheme_is_unrecognized() {
    for link in ["unknown://something", "hysteria2://host:443", "", "vmess"] {
        assert!(
            matches!(Protocol::parse(link), Err(ParseError::UnrecognizedScheme(_))),
            "{:?}",
            link
        );
    }
}

#[test]
fn variant_rejects_foreign_prefix() {
    assert!(matches!(VMess::parse("vless://u@h:1"), Err(ParseError::UnrecognizedScheme(_))));
    assert!(matches!(VLess::parse("trojan://u@h:1"), Err(ParseError::UnrecognizedScheme(_))));
    assert!(matches!(Shadowsocks::parse("vless://u@h:1"), Err(ParseError::UnrecognizedScheme(_))));
    assert!(matches!(WireGuard::parse("ss://u@h:1"), Err(ParseError::UnrecognizedScheme(_))));
}

#[test]
fn orig_link_is_carried() {
    let link = "trojan://pw@host:443?type=grpc&serviceName=svc#node";
    let p = Protocol::parse(link).unwrap();
    assert_eq!(p.orig_link(), link);
    assert_eq!(p.summary().orig_link, link);
}

// =============================================================================
// Determinism and defaulting
// =============================================================================

#[test]
fn parsing_is_deterministic() {
    let links = [
        "vless://uuid@h.example.com:443?type=ws&security=tls&sni=s.example.com#a".to_string(),
        "trojan://pw@h.example.com:443?type=grpc&serviceName=%2Fsvc".to_string(),
        format!("vmess://{}", b64(r#"{"add":"h","port":"80","id":"u","net":"h2","tls":"tls"}"#)),
        format!("ss://{}@h:8388#t", b64("aes-128-gcm:pw")),
        "wireguard://sk@h:51820?publickey=pk&address=10.0.0.2%2F32&mtu=1280".to_string(),
    ];
    for link in &links {
        let a = Protocol::parse(link).unwrap();
        let b = Protocol::parse(link).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.summary(), b.summary());
        assert_eq!(a.details(), b.details());
        assert_eq!(a.build_outbound(true).unwrap(), b.build_outbound(true).unwrap());
    }
}

#[test]
fn defaulting_is_idempotent() {
    let bare = Trojan::parse("trojan://pw@h:443").unwrap();
    let explicit = Trojan::parse("trojan://pw@h:443?type=tcp&security=tls&fp=chrome").unwrap();
    assert_eq!(bare.config, explicit.config);

    let bare = VLess::parse("vless://id@h:443?type=ws").unwrap();
    let explicit = VLess::parse("vless://id@h:443?type=ws&security=none&path=%2F").unwrap();
    assert_eq!(bare.config, explicit.config);

    let bare = VLess::parse("vless://id@h:443?type=grpc&serviceName=%2Fsvc").unwrap();
    let explicit =
        VLess::parse("vless://id@h:443?type=grpc&serviceName=svc&security=none").unwrap();
    assert_eq!(bare.config, explicit.config);
}

#[test]
fn summary_reports_none_without_security() {
    let p = Protocol::parse("vless://id@h:443").unwrap();
    assert_eq!(p.summary().tls, "none");
    let p = Protocol::parse("wireguard://sk@h:51820").unwrap();
    assert_eq!(p.summary().tls, "none");
}

#[test]
fn alpn_defaults_only_at_build_time() {
    let p = Protocol::parse("trojan://pw@h:443").unwrap();
    assert_eq!(p.summary().alpn, "");
    assert!(p.details().contains("ALPN: none\n"));
    let out = serde_json::to_value(p.build_outbound(false).unwrap()).unwrap();
    assert_eq!(out["streamSettings"]["tlsSettings"]["alpn"][0], "http/1.1");
}

#[test]
fn remark_decoding_failure_keeps_raw_fragment() {
    let p = Protocol::parse("vless://id@h:443#%E4%BD%A0%E5%A5%BD").unwrap();
    assert_eq!(p.summary().remark, "你好");
    let p = Protocol::parse("vless://id@h:443#100%").unwrap();
    assert_eq!(p.summary().remark, "100%");
}

// =============================================================================
// IPv6
// =============================================================================

#[test]
fn ipv6_literals_are_bracketed_everywhere() {
    let links = [
        "vless://id@[2001:db8::1]:443".to_string(),
        "trojan://pw@[2001:db8::1]:443".to_string(),
        format!("ss://{}@[2001:db8::1]:443", b64("aes-256-gcm:pw")),
        format!("vmess://{}", b64(r#"{"add":"2001:db8::1","port":443,"id":"u"}"#)),
        "wireguard://sk@[2001:db8::1]:443".to_string(),
    ];
    for link in &links {
        let p = Protocol::parse(link).unwrap();
        assert_eq!(p.summary().address, "[2001:db8::1]", "{}", link);
    }
    let w = WireGuard::parse("wireguard://sk@[2001:db8::1]:443").unwrap();
    assert_eq!(w.endpoint(), "[2001:db8::1]:443");
}

#[test]
fn bare_ipv6_without_port_is_malformed() {
    for link in [
        "vless://id@2001:db8::1",
        "trojan://pw@2001:db8::1",
        "wireguard://sk@2001:db8::1",
    ] {
        assert!(
            matches!(Protocol::parse(link), Err(ParseError::MalformedUri(_))),
            "{}",
            link
        );
    }
    let p = Protocol::parse("vless://id@2001:db8::1:443").unwrap();
    assert_eq!(p.summary().address, "[2001:db8::1]");
    assert_eq!(p.summary().port, "443");
}

// =============================================================================
// Instrumented engine
// =============================================================================

#[derive(Default)]
struct Stats {
    starts: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Behaviour is picked by the server address of the outbound:
/// `fail-start.*` never starts, `silent.*` never answers, `slow.*` hangs,
/// `speed-fail.*` answers the delay request only, `panic.*` panics on request.
/// Delay equals the port in ms.
struct MockEngine {
    stats: Arc<Stats>,
}

impl MockEngine {
    fn new() -> (Arc<Self>, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (Arc::new(MockEngine { stats: stats.clone() }), stats)
    }
}

fn server_of(outbound: &Outbound) -> (String, u64) {
    let settings = &outbound.settings;
    let server = settings
        .get("vnext")
        .or_else(|| settings.get("servers"))
        .and_then(|list| list.get(0))
        .cloned()
        .unwrap_or_default();
    (
        server["address"].as_str().unwrap_or_default().to_string(),
        server["port"].as_u64().unwrap_or_default(),
    )
}

#[async_trait]
impl Engine for MockEngine {
    async fn start(
        &self,
        outbound: &Outbound,
        _allow_insecure: bool,
    ) -> Result<Box<dyn Instance>, ProbeError> {
        let (address, port) = server_of(outbound);
        if address.starts_with("fail-start") {
            return Err(ProbeError::StartFailed(address));
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(MockInstance {
            stats: self.stats.clone(),
            address,
            delay: Duration::from_millis(port),
            closed: false,
        }))
    }
}

struct MockInstance {
    stats: Arc<Stats>,
    address: String,
    delay: Duration,
    closed: bool,
}

#[async_trait]
impl Instance for MockInstance {
    async fn request(
        &self,
        request: &ProbeRequest,
        _timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let speed = request.url.contains("speed.cloudflare.com");
        if self.address.starts_with("silent") || (speed && self.address.starts_with("speed-fail")) {
            return Err(ProbeError::NoResponse(self.address.clone()));
        }
        if self.address.starts_with("panic") {
            panic!("instance for {} blew up", self.address);
        }
        if self.address.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ProbeResponse {
            elapsed: if speed { Duration::from_secs(1) } else { self.delay },
            status: 200,
            body: Some("ok".to_string()),
        })
    }

    async fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if !self.closed {
            self.closed = true;
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn prober(engine: Arc<MockEngine>, config: ProbeConfig) -> Prober {
    Prober::new(engine, config)
}

// =============================================================================
// Harness
// =============================================================================

#[tokio::test]
async fn failing_links_do_not_affect_others() {
    let (engine, stats) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::builder().threads(4).build());
    let links = vec![
        "vless://id@good-a.example:120".to_string(),
        "not-a-link".to_string(),
        format!("vmess://{}", b64(r#"{"add":"h","port":"abc","id":"u"}"#)),
        "trojan://pw@fail-start.example:443".to_string(),
        "vless://id@silent.example:443".to_string(),
        "trojan://pw@good-b.example:80".to_string(),
    ];

    let mut results = prober.run(links).await;
    results.sort_by(|a, b| a.link.cmp(&b.link));
    let links: Vec<_> = results.iter().map(|r| r.link.as_str()).collect();
    assert_eq!(links, ["trojan://pw@good-b.example:80", "vless://id@good-a.example:120"]);
    assert_eq!(results[0].tls, "tls");
    assert_eq!(results[0].delay, 80);
    assert_eq!(results[1].tls, "none");

    // good-a, good-b and silent started; each closed once
    assert_eq!(stats.starts.load(Ordering::SeqCst), 3);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 3);
    assert_eq!(stats.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn skip_reasons_name_the_failing_stage() {
    let (engine, _) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::default());
    let stage = |outcome: Outcome| match outcome {
        Outcome::Skipped { reason, .. } => reason.stage(),
        Outcome::Measured(_) => "measured",
    };

    assert_eq!(stage(prober.probe_one("bogus://x").await), "parse");
    let bad_port = format!("vmess://{}", b64(r#"{"add":"h","port":0,"id":"u"}"#));
    assert_eq!(stage(prober.probe_one(&bad_port).await), "build");
    assert_eq!(stage(prober.probe_one("vless://id@fail-start.x:1").await), "start");
    assert_eq!(stage(prober.probe_one("vless://id@silent.x:1").await), "delay");
    assert_eq!(stage(prober.probe_one("vless://id@ok.x:1").await), "measured");
}

#[tokio::test]
async fn concurrency_never_exceeds_thread_count() {
    let (engine, stats) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::builder().threads(3).build());
    let links: Vec<String> = (1..=12)
        .map(|i| format!("vless://id@host-{}.example:{}", i, 100 + i))
        .collect();

    let results = prober.run(links).await;
    assert_eq!(results.len(), 12);
    let peak = stats.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak {}", peak);
    assert!(peak >= 1);
    assert_eq!(stats.starts.load(Ordering::SeqCst), 12);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn single_thread_runs_one_at_a_time() {
    let (engine, stats) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::builder().threads(1).build());
    let links: Vec<String> = (1..=4)
        .map(|i| format!("trojan://pw@h{}.example:{}", i, i))
        .collect();
    assert_eq!(prober.run(links).await.len(), 4);
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn speedtest_failure_zeroes_throughput_and_releases_once() {
    let (engine, stats) = MockEngine::new();
    let config = ProbeConfig::builder()
        .speedtest(true)
        .speedtest_amount_kb(1000)
        .build();
    let prober = prober(engine, config);

    match prober.probe_one("vless://id@speed-fail.example:250").await {
        Outcome::Measured(result) => {
            assert_eq!(result.delay, 250);
            assert_eq!(result.download, 0.0);
            assert_eq!(result.upload, 0.0);
        }
        other => panic!("expected a measured result, got {:?}", other),
    }
    assert_eq!(stats.starts.load(Ordering::SeqCst), 1);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn speedtest_reports_mbps() {
    let (engine, _) = MockEngine::new();
    let config = ProbeConfig::builder()
        .speedtest(true)
        .speedtest_amount_kb(1000)
        .build();
    let prober = prober(engine, config);

    match prober.probe_one("trojan://pw@fast.example:30").await {
        // 1 MB in one second
        Outcome::Measured(result) => {
            assert!((result.download - 8.0).abs() < 1e-3);
            assert!((result.upload - 8.0).abs() < 1e-3);
        }
        other => panic!("expected a measured result, got {:?}", other),
    }
}

#[tokio::test]
async fn no_speedtest_leaves_throughput_zero() {
    let (engine, _) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::default());
    match prober.probe_one("trojan://pw@fast.example:30").await {
        Outcome::Measured(result) => {
            assert_eq!(result.download, 0.0);
            assert_eq!(result.upload, 0.0);
        }
        other => panic!("expected a measured result, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_request_times_out_and_releases() {
    let (engine, stats) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::default());

    let started = tokio::time::Instant::now();
    let outcome = prober.probe_one("vless://id@slow.example:443").await;
    assert!(matches!(
        outcome,
        Outcome::Skipped {
            reason: SkipReason::NoResponse(ProbeError::NoResponse(_)),
            ..
        }
    ));
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_measurement_still_releases_the_instance() {
    let (engine, stats) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::default());

    let single = prober.clone();
    let joined =
        tokio::spawn(async move { single.probe_one("vless://id@panic.example:443").await }).await;
    assert!(joined.unwrap_err().is_panic());
    assert_eq!(stats.starts.load(Ordering::SeqCst), 1);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    assert_eq!(stats.active.load(Ordering::SeqCst), 0);

    let links = vec![
        "vless://id@panic.example:443".to_string(),
        "vless://id@good.example:60".to_string(),
    ];
    let results = prober.run(links).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].delay, 60);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 3);
    assert_eq!(stats.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_then_sort_orders_by_delay() {
    let (engine, _) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::builder().threads(8).build());
    let links = vec![
        "vless://id@c.example:300".to_string(),
        "vless://id@a.example:100".to_string(),
        "vless://id@b.example:200".to_string(),
    ];
    let mut results = prober.run(links).await;
    report::sort_results(&mut results);
    let delays: Vec<_> = results.iter().map(|r| r.delay).collect();
    assert_eq!(delays, [100, 200, 300]);
}

// =============================================================================
// Ordering and report
// =============================================================================

fn result(link: &str, delay: u64, download: f32, upload: f32) -> ProbeResult {
    ProbeResult {
        link: link.to_string(),
        tls: "none".to_string(),
        delay,
        download,
        upload,
    }
}

#[test]
fn neither_ahead_keeps_input_order_in_both_directions() {
    // A is faster, B downloads more: no preference either way
    let a = result("vless://a", 100, 5.0, 5.0);
    let b = result("vless://b", 200, 10.0, 5.0);
    assert!(!report::is_ahead(&a, &b));
    assert!(!report::is_ahead(&b, &a));

    for input in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
        let mut sorted = input.clone();
        report::sort_results(&mut sorted);
        assert_eq!(sorted, input);
    }
}

#[tokio::test]
async fn malformed_link_dropped_and_trade_off_pair_kept_in_order() {
    let (engine, _) = MockEngine::new();
    let prober = prober(engine, ProbeConfig::default());
    let links = vec![
        "vless://id@a.example:50".to_string(),
        "vless://missing-port@b.example".to_string(),
        "vless://id@b.example:80".to_string(),
    ];
    assert_eq!(prober.run(links).await.len(), 2);

    // A: 50ms 10/5, B: 80ms 20/20. A is faster but slower in both directions.
    let a = result("A", 50, 10.0, 5.0);
    let b = result("B", 80, 20.0, 20.0);
    let mut sorted = vec![a.clone(), b.clone()];
    report::sort_results(&mut sorted);
    assert_eq!(sorted, vec![a.clone(), b.clone()]);
    let mut sorted = vec![b.clone(), a.clone()];
    report::sort_results(&mut sorted);
    assert_eq!(sorted, vec![b, a]);
}

#[test]
fn sort_never_panics_on_inconsistent_orders() {
    let mut results: Vec<_> = (0..40)
        .map(|i| {
            result(
                &format!("l{}", i % 7),
                (i * 37 % 11) as u64,
                (i * 13 % 5) as f32,
                (i * 7 % 3) as f32,
            )
        })
        .collect();
    report::sort_results(&mut results);
    assert_eq!(results.len(), 40);
    for pair in results.windows(2) {
        assert!(!report::is_ahead(&pair[1], &pair[0]));
    }
}

#[test]
fn csv_round_trip() {
    let results = vec![
        result("vless://id@h:443?type=ws&path=%2F#a,b", 120, 12.5, 3.25),
        ProbeResult {
            tls: "reality".to_string(),
            ..result("trojan://pw@h:443", 80, 0.0, 0.0)
        },
    ];
    let text = report::render(ReportFormat::Csv, &results).unwrap();
    assert!(text.starts_with("link,tls,delay,download,upload\n"));

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let parsed: Vec<ProbeResult> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(parsed, results);
}

#[test]
fn write_report_txt_to_file() {
    let path = std::env::temp_dir().join(format!("valid-{}.txt", std::process::id()));
    let results = vec![result("l1", 1, 0.0, 0.0), result("l2", 2, 0.0, 0.0)];
    let saved = report::write_report(&path, ReportFormat::Txt, &results).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(saved, 2);
    assert_eq!(written, "l1\n\nl2");
}

#[test]
fn probe_result_tokens() {
    let r = ProbeResult {
        link: "vless://x".to_string(),
        tls: "tls".to_string(),
        delay: 42,
        download: 1.5,
        upload: 0.0,
    };
    assert_tokens(
        &r,
        &[
            Token::Struct {
                name: "ProbeResult",
                len: 5,
            },
            Token::Str("link"),
            Token::Str("vless://x"),
            Token::Str("tls"),
            Token::Str("tls"),
            Token::Str("delay"),
            Token::U64(42),
            Token::Str("download"),
            Token::F32(1.5),
            Token::Str("upload"),
            Token::F32(0.0),
            Token::StructEnd,
        ],
    );
}
