//! Download/upload throughput through an engine instance.

use crate::constants::probe::{SPEEDTEST_DOWN_URL, SPEEDTEST_UP_URL};
use crate::engine::{Instance, Payload, ProbeRequest};
use crate::error::ProbeError;
use std::time::Duration;

/// Direction of a throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Download,
    Upload,
}

impl Direction {
    fn request(self, bytes: u64) -> ProbeRequest {
        match self {
            Direction::Download => ProbeRequest::new(
                reqwest::Method::GET,
                format!("{}{}", SPEEDTEST_DOWN_URL, bytes),
            ),
            Direction::Upload => ProbeRequest::new(reqwest::Method::POST, SPEEDTEST_UP_URL)
                .with_body(Payload::Zeros(bytes)),
        }
    }
}

/// Payload size in bytes for an amount in KB.
pub(crate) fn payload_bytes(amount_kb: u32) -> u64 {
    u64::from(amount_kb) * 1000
}

/// Throughput in Mbit/s; zero when nothing measurable elapsed.
pub(crate) fn mbps(bytes: u64, elapsed: Duration) -> f32 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0 / secs / 1_000_000.0) as f32
}

/// Transfers `bytes` in one direction and returns the throughput.
///
/// # Errors
///
/// Any failure, timeout or error status becomes `ProbeError::SpeedtestFailed`.
pub(crate) async fn measure(
    instance: &dyn Instance,
    direction: Direction,
    bytes: u64,
    timeout: Duration,
) -> Result<f32, ProbeError> {
    let request = direction.request(bytes);
    let response = tokio::time::timeout(timeout, instance.request(&request, timeout))
        .await
        .map_err(|_| {
            ProbeError::SpeedtestFailed(format!("{:?} timed out after {:?}", direction, timeout))
        })?
        .map_err(|e| ProbeError::SpeedtestFailed(format!("{:?}: {}", direction, e)))?;

    if response.status >= 400 {
        return Err(ProbeError::SpeedtestFailed(format!(
            "{:?}: status {}",
            direction, response.status
        )));
    }
    Ok(mbps(bytes, response.elapsed))
}
