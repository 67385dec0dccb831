//! The Intent Reconciler: drives `ProfilingConfig` resources through
//! the controller-runtime watch/reconcile loop, wiring the registry,
//! monitors, and health/metrics surface together.

use crate::config::types::Config;
use crate::crd::ProfilingConfig;
use crate::error::Error;
use crate::metrics;
use crate::monitors::{self, MonitorHandles};
use crate::publisher::Reason;
use crate::registry::Registry;
use crate::server::{self, ServerState};
use chrono::Utc;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::runtime::watcher;
use kube::Client;
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

const FINALIZER_NAME: &str = "profiling.k8s.dev/finalizer";

type ReconcileError = FinalizerError<Error>;

/// Everything the reconcile loop shares across invocations.
pub struct ReconcileContext {
    pub client: Client,
    pub registry: Arc<Registry>,
    pub monitors: SyncMutex<HashMap<String, MonitorHandles>>,
    pub outcomes: mpsc::UnboundedSender<monitors::CaptureOutcome>,
    pub config: Config,
}

/// Start the controller: verify cluster connectivity, spawn the
/// health/metrics server, then run the watch loop until shutdown.
pub async fn run(config: Config) -> crate::error::Result<()> {
    let client = Client::try_default().await?;

    client.apiserver_version().await?;
    info!("connected_to_cluster");

    metrics::init();

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_state = Arc::new(Mutex::new(ServerState { ready: false }));
    let health_addr = config
        .health_addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid health_addr: {e}")))?;
    let metrics_addr = config
        .metrics_addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid metrics_addr: {e}")))?;

    let server_shutdown_rx = shutdown_tx.subscribe();
    let server_state_for_serve = server_state.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(server_state_for_serve, server_shutdown_rx, health_addr, metrics_addr).await
        {
            error!(error = %e, "health_metrics_server_failed");
        }
    });

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(ReconcileContext {
        client: client.clone(),
        registry: Arc::new(Registry::new()),
        monitors: SyncMutex::new(HashMap::new()),
        outcomes: outcome_tx,
        config,
    });

    let outcome_client = client.clone();
    let outcome_drain = tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            let (namespace, _) = outcome
                .intent_key
                .split_once('/')
                .unwrap_or(("default", outcome.intent_key.as_str()));
            let reason_label = match outcome.reason {
                Reason::ThresholdExceeded => "threshold-exceeded",
                Reason::OnDemand => "on-demand",
            };
            metrics::CAPTURES_TOTAL
                .with_label_values(&[namespace, &outcome.intent_key, reason_label])
                .inc();
            metrics::UPLOADS_TOTAL
                .with_label_values(&[namespace, &outcome.intent_key])
                .inc_by(outcome.uploaded as u64);

            record_capture_outcome(&outcome_client, &outcome).await;
        }
    });

    let intents: Api<ProfilingConfig> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    server_state.lock().await.ready = true;

    let controller = Controller::new(intents, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(intent) => info!(intent = ?intent, "reconcile_succeeded"),
                Err(e) => warn!(error = %e, "reconcile_failed"),
            }
        });

    tokio::select! {
        _ = controller => {
            info!("controller_loop_exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
    }

    let _ = shutdown_tx.send(());
    for handles in ctx.monitors.lock().values() {
        handles.cancel();
    }
    outcome_drain.abort();
    let _ = server_task.await;

    Ok(())
}

/// Reconcile a single `ProfilingConfig`: handle finalization, populate the
/// registry from the matching instance set, (re)start its monitors, and
/// patch status.
async fn reconcile(
    intent: Arc<ProfilingConfig>,
    ctx: Arc<ReconcileContext>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    metrics::RECONCILE_TOTAL.inc();

    let namespace = intent.namespace().unwrap_or_else(|| "default".to_string());
    let intents: Api<ProfilingConfig> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&intents, FINALIZER_NAME, intent, |event| async {
        match event {
            FinalizerEvent::Apply(intent) => apply(intent, ctx.clone()).await,
            FinalizerEvent::Cleanup(intent) => cleanup(intent, ctx.clone()).await,
        }
    })
    .await;

    metrics::RECONCILE_DURATION.observe(start.elapsed().as_secs_f64());

    if result.is_err() {
        metrics::RECONCILE_ERRORS.inc();
    }
    result
}

async fn apply(
    intent: Arc<ProfilingConfig>,
    ctx: Arc<ReconcileContext>,
) -> Result<Action, Error> {
    let intent_key = format!(
        "{}/{}",
        intent.namespace().unwrap_or_else(|| "default".to_string()),
        intent.name_any()
    );

    if let Err(violation) = intent.spec.validate() {
        warn!(intent = %intent_key, reason = %violation, "intent_rejected");
        return Err(Error::Validation(violation));
    }

    let namespace = intent
        .spec
        .selector
        .namespace
        .clone()
        .unwrap_or_else(|| intent.namespace().unwrap_or_else(|| "default".to_string()));

    let matching =
        Registry::list_matching(&ctx.client, &intent.spec.selector, &namespace).await?;

    // Untrack only instances that dropped out of the current matching set;
    // re-tracking everything unconditionally would defeat `track()`'s
    // same-intent `last_profiled` preservation and reset cooldowns every
    // reconcile.
    let matching_keys: HashSet<_> = matching.iter().map(|i| i.key.clone()).collect();
    for stale in ctx.registry.tracked_for_intent(&intent_key) {
        if !matching_keys.contains(&stale.instance.key) {
            ctx.registry.untrack(&stale.instance.key);
        }
    }
    for instance in matching {
        ctx.registry.track(instance, &intent_key);
    }

    let active = ctx.registry.count_for_intent(&intent_key);
    metrics::ACTIVE_INSTANCES
        .with_label_values(&[&namespace, &intent_key])
        .set(active as i64);

    {
        let mut monitors = ctx.monitors.lock();
        if let Some(existing) = monitors.remove(&intent_key) {
            existing.cancel();
        }
        let handles = monitors::spawn(
            intent_key.clone(),
            intent.spec.clone(),
            ctx.client.clone(),
            ctx.registry.clone(),
            ctx.outcomes.clone(),
        );
        monitors.insert(intent_key.clone(), handles);
    }

    patch_status(&intent, &ctx, active as u32, None).await.ok();

    Ok(Action::requeue(Duration::from_secs(
        ctx.config.reconcile_requeue_secs,
    )))
}

async fn cleanup(intent: Arc<ProfilingConfig>, ctx: Arc<ReconcileContext>) -> Result<Action, Error> {
    let intent_key = format!(
        "{}/{}",
        intent.namespace().unwrap_or_else(|| "default".to_string()),
        intent.name_any()
    );

    if let Some(handles) = ctx.monitors.lock().remove(&intent_key) {
        handles.cancel();
    }
    ctx.registry.untrack_intent(&intent_key);
    info!(intent = %intent_key, "intent_cleaned_up");

    Ok(Action::await_change())
}

/// Re-fetch the intent, bump its capture/upload counters and last-capture
/// timestamp, and patch its status. Failures are logged and swallowed —
/// a stale counter is not worth retrying outside the next capture cycle.
async fn record_capture_outcome(client: &Client, outcome: &monitors::CaptureOutcome) {
    let Some((namespace, name)) = outcome.intent_key.split_once('/') else {
        return;
    };
    let intents: Api<ProfilingConfig> = Api::namespaced(client.clone(), namespace);

    let intent = match intents.get(name).await {
        Ok(intent) => intent,
        Err(e) => {
            warn!(intent = %outcome.intent_key, error = %e, "status_refetch_failed");
            return;
        }
    };

    let prior_captures = intent
        .status
        .as_ref()
        .and_then(|s| s.capture_count)
        .unwrap_or(0);
    let prior_uploads = intent
        .status
        .as_ref()
        .and_then(|s| s.upload_count)
        .unwrap_or(0);

    let status = serde_json::json!({
        "status": {
            "lastCapture": Utc::now().to_rfc3339(),
            "captureCount": prior_captures + 1,
            "uploadCount": prior_uploads + outcome.uploaded as u64,
        }
    });

    if let Err(e) = intents
        .patch_status(name, &PatchParams::apply("profiling-operator"), &Patch::Merge(status))
        .await
    {
        warn!(intent = %outcome.intent_key, error = %e, "status_update_failed");
    }
}

async fn patch_status(
    intent: &ProfilingConfig,
    ctx: &ReconcileContext,
    active_instances: u32,
    message: Option<String>,
) -> Result<(), Error> {
    let namespace = intent.namespace().unwrap_or_else(|| "default".to_string());
    let intents: Api<ProfilingConfig> = Api::namespaced(ctx.client.clone(), &namespace);

    let status = serde_json::json!({
        "status": {
            "observedGeneration": intent.metadata.generation,
            "activeInstances": active_instances,
            "message": message,
        }
    });

    intents
        .patch_status(
            &intent.name_any(),
            &PatchParams::apply("profiling-operator"),
            &Patch::Merge(status),
        )
        .await?;

    Ok(())
}

/// Error policy: record the error metric and requeue after a short backoff
///.
fn error_policy(
    _intent: Arc<ProfilingConfig>,
    error: &ReconcileError,
    _ctx: Arc<ReconcileContext>,
) -> Action {
    error!(error = %error, "reconcile_error_policy");
    Action::requeue(Duration::from_secs(60))
}
