//! Background chain-tip probing.
//!
//! Rotates over the configured probe URLs, asking each for the current slot
//! and feeding observations into the shared [`SlotTracker`]. Runs until the
//! shutdown token fires; disabled when no probe URLs are configured.

use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lumen_core::{
    config::SlotSyncConfig,
    upstream::{ForwardedHeaders, HttpClient, RoundRobinSelector, Selector, SlotTracker},
};

const GET_SLOT_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","id":1,"method":"getSlot","params":[{"commitment":"finalized"}]}"#;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn spawn(
    tracker: Arc<SlotTracker>,
    client: Arc<HttpClient>,
    config: SlotSyncConfig,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if config.probe_urls.is_empty() {
        tracing::info!("slot sync disabled: no probe urls configured");
        return None;
    }

    let probes: RoundRobinSelector<String> =
        RoundRobinSelector::new(config.probe_urls.iter().cloned().map(Arc::new).collect());
    let period = Duration::from_secs(config.interval_seconds.max(1));

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Ok((url, _)) = probes.get_next(&[]) else { break };
            match client
                .post(
                    url.as_str(),
                    Bytes::from_static(GET_SLOT_BODY),
                    PROBE_TIMEOUT,
                    &ForwardedHeaders::default(),
                )
                .await
            {
                Ok((body, _status)) => match parse_slot(&body) {
                    Some(slot) => {
                        tracker.observe(slot);
                        tracing::debug!(slot, "slot estimate refreshed");
                    }
                    None => tracing::debug!(url = %url, "slot probe returned no result"),
                },
                Err(e) => tracing::debug!(url = %url, error = %e, "slot probe failed"),
            }
        }
        tracing::debug!("slot sync task stopped");
    }))
}

fn parse_slot(body: &[u8]) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("result")?.as_i64()
}
