//! Channel responders — one background task per operation channel.
//!
//! Each responder subscribes on its channel, skips everything that is
//! not a request frame, executes the operation, and publishes a
//! response carrying the request's correlation id. Handler failures
//! are answered as error frames; they never take the responder down.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flotilla_broker::{Bus, error_frame, request_params, response_frame};
use flotilla_core::ALL_SERVICES;
use flotilla_fleet::FleetController;
use flotilla_scaler::ScalingController;
use flotilla_stats::StatsAggregator;

/// Everything the responders execute against.
#[derive(Clone)]
pub struct ApiContext {
    pub fleet: Arc<FleetController>,
    pub scaler: Arc<ScalingController>,
    pub stats: Arc<StatsAggregator>,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

fn required_str(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing or non-string parameter {key:?}"))
}

fn required_u64(params: &Value, key: &str) -> Result<u64, String> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("missing or non-numeric parameter {key:?}"))
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Spawn a responder loop for one channel.
fn spawn_responder<F>(
    bus: Bus,
    channel: &'static str,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
{
    let mut rx = bus.subscribe(channel);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel, skipped, "responder lagged behind the bus");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some((id, params)) = request_params(&frame) else {
                        continue;
                    };
                    let id = id.to_string();
                    debug!(channel, correlation_id = %id, "handling request");
                    match handler(params.clone()).await {
                        Ok(data) => {
                            bus.publish(channel, response_frame(&id, data));
                        }
                        Err(message) => {
                            warn!(channel, correlation_id = %id, error = %message, "request failed");
                            bus.publish(channel, error_frame(&id, &message));
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(channel, "responder stopped");
    })
}

/// Spawn every operation responder. Returns the task handles so the
/// daemon can join them on shutdown.
pub fn spawn_responders(
    bus: &Bus,
    ctx: ApiContext,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getAllInstances",
            shutdown.clone(),
            move |_| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let instances = ctx.fleet.list_instances().await.map_err(|e| e.to_string())?;
                    to_json(instances)
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getAllInstancesTypes",
            shutdown.clone(),
            move |_| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let types = ctx.fleet.list_types().await.map_err(|e| e.to_string())?;
                    to_json(types)
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getAllInstancesByType",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let service_type = required_str(&params, "type")?;
                    let instances = ctx
                        .fleet
                        .instances_by_type(&service_type)
                        .await
                        .map_err(|e| e.to_string())?;
                    to_json(instances)
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getTotalInstancesByType",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let service_type = required_str(&params, "type")?;
                    let total = ctx
                        .fleet
                        .count_by_type(&service_type)
                        .await
                        .map_err(|e| e.to_string())?;
                    to_json(total)
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "setTotalInstancesByType",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let service_type = required_str(&params, "type")?;
                    let new_total = required_u64(&params, "newTotal")? as u32;
                    let report = ctx
                        .scaler
                        .set_total(&service_type, new_total)
                        .await
                        .map_err(|e| e.to_string())?;
                    to_json(format!(
                        "proxy reconciled with {} instances of type {:?}",
                        report.target_total, report.service_type
                    ))
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getResponseStatsFromTimestamp",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let timestamp = required_u64(&params, "timestamp")?;
                    to_json(ctx.stats.query_range(ALL_SERVICES, timestamp))
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getServiceTypeResponseStatsFromTimestamp",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let service_type = required_str(&params, "serviceType")?;
                    let timestamp = required_u64(&params, "timestamp")?;
                    to_json(ctx.stats.query_range(&service_type, timestamp))
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getSegregatedResponseStatsFromTimestamp",
            shutdown.clone(),
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let timestamp = required_u64(&params, "timestamp")?;
                    to_json(ctx.stats.query_range_segregated(ALL_SERVICES, timestamp))
                })
            },
        ));
    }

    {
        let ctx = ctx.clone();
        handles.push(spawn_responder(
            bus.clone(),
            "getServiceTypeSegregatedResponseStatsFromTimestamp",
            shutdown,
            move |params| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let service_type = required_str(&params, "serviceType")?;
                    let timestamp = required_u64(&params, "timestamp")?;
                    to_json(ctx.stats.query_range_segregated(&service_type, timestamp))
                })
            },
        ));
    }

    info!(responders = handles.len(), "operation responders started");
    handles
}

/// Ingest loop: validate frames from the response-event channel and
/// fold them into the aggregator. Malformed payloads are logged and
/// dropped, never surfaced to producers.
pub fn spawn_event_ingest(
    bus: &Bus,
    stats: Arc<StatsAggregator>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe(flotilla_core::RESPONSES_CHANNEL);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Ok(frame) => match flotilla_core::ResponseEvent::from_value(frame) {
                            Some(event) => stats.record(&event),
                            None => debug!("dropped malformed response event"),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event ingest lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("event ingest stopped");
    })
}
