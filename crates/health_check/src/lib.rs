use std::time::{
    Duration,
    Instant,
};

use backoff::{
    future::retry,
    ExponentialBackoff,
};
use reqwest::Url;

/// Probes `endpoint` on the backend once and returns the body it served.
pub async fn health_check(
    service_url: &Url,
    endpoint: &str,
    request_timeout: Duration,
) -> anyhow::Result<String> {
    let client = reqwest::Client::new();
    health_check_once(&client, service_url, endpoint, request_timeout).await
}

/// Polls `endpoint` with exponential backoff until the backend answers with
/// a 2xx, giving up after `max_elapsed`.
pub async fn wait_for_http_health(
    service_url: &Url,
    endpoint: &str,
    max_elapsed: Duration,
    request_timeout: Duration,
) -> anyhow::Result<String> {
    let start = Instant::now();
    let client = reqwest::Client::new();
    tracing::info!("Waiting for health of {service_url} ({endpoint})");
    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    };
    let result = retry(backoff, || async {
        health_check_once(&client, service_url, endpoint, request_timeout)
            .await
            .map_err(|e| {
                tracing::debug!("{e:#}");
                backoff::Error::transient(e)
            })
    })
    .await;
    match result {
        Ok(version) => {
            tracing::info!(
                "{service_url} healthy at version:{} after {:?}",
                version.trim(),
                start.elapsed()
            );
            Ok(version)
        },
        Err(e) => anyhow::bail!(
            "Timed out waiting for health of {service_url} after {:?}: {e:#}",
            start.elapsed()
        ),
    }
}

/// Resolves `endpoint` under the service's path, with or without a trailing
/// slash on `service_url`.
fn endpoint_url(service_url: &Url, endpoint: &str) -> anyhow::Result<Url> {
    let mut base = service_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(endpoint.trim_start_matches('/'))?)
}

async fn health_check_once(
    client: &reqwest::Client,
    service_url: &Url,
    endpoint: &str,
    request_timeout: Duration,
) -> anyhow::Result<String> {
    let health_url = endpoint_url(service_url, endpoint)?;
    let response = client
        .get(health_url)
        .timeout(request_timeout)
        .send()
        .await;
    match response {
        Ok(r) => {
            anyhow::ensure!(
                r.status().is_success(),
                "Health check on {service_url} failed: {}",
                r.status()
            );
            Ok(r.text().await?)
        },
        Err(e) => anyhow::bail!("Health check on {service_url} failed: {e}"),
    }
}
