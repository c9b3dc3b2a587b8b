//! HTTP JSON API for the dashboard
//!
//! Two modes:
//! - on request (default): each `GET /api/gpu-stats` runs one poll cycle
//! - background: a timer task polls on a fixed interval and requests are
//!   served from the latest cached snapshot
//!
//! Either way the monitor sits behind a single mutex, so cycles and resets
//! never interleave. Cycles run on tokio's blocking pool because they spawn
//! and wait on subprocesses.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    middleware,
    response::{Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::monitor::{GpuMonitor, Snapshot};

/// Outcome of the most recent cycle, as served in background mode
#[derive(Debug, Clone)]
enum LatestCycle {
    Ready(Snapshot),
    Failed(String),
}

/// Shared server state
pub struct ApiState {
    monitor: Mutex<GpuMonitor>,
    latest: Mutex<Option<LatestCycle>>,
    background: bool,
}

impl ApiState {
    /// Wrap a monitor; `background` makes reads prefer the cached snapshot
    pub fn new(monitor: GpuMonitor, background: bool) -> Arc<Self> {
        Arc::new(Self {
            monitor: Mutex::new(monitor),
            latest: Mutex::new(None),
            background,
        })
    }

    /// Lock the monitor, recovering it if an earlier cycle panicked
    fn lock_monitor(&self) -> MutexGuard<'_, GpuMonitor> {
        self.monitor.lock().unwrap_or_else(|poisoned| {
            log::warn!("Recovering monitor state after a panicked cycle");
            self.monitor.clear_poison();
            poisoned.into_inner()
        })
    }

    fn remember(&self, outcome: &Result<Snapshot>) {
        let latest = match outcome {
            Ok(snapshot) => LatestCycle::Ready(snapshot.clone()),
            Err(e) => LatestCycle::Failed(e.to_string()),
        };
        let mut slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(latest);
    }

    fn cached(&self) -> Option<LatestCycle> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one cycle on the blocking pool and cache its outcome
    pub async fn run_cycle(self: &Arc<Self>) -> Result<Snapshot> {
        let state = Arc::clone(self);
        let cycle = tokio::task::spawn_blocking(move || {
            let mut monitor = state.lock_monitor();
            monitor.poll()
        });
        let outcome = match cycle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Internal(format!("poll cycle aborted: {}", e))),
        };
        self.remember(&outcome);
        outcome
    }

    /// Snapshot for a request: the last cycle's outcome in background mode,
    /// a fresh cycle otherwise
    pub async fn current_snapshot(self: &Arc<Self>) -> Result<Snapshot> {
        if self.background {
            match self.cached() {
                Some(LatestCycle::Ready(snapshot)) => return Ok(snapshot),
                Some(LatestCycle::Failed(reason)) => {
                    return Err(Error::Internal(format!(
                        "last background cycle failed: {}",
                        reason
                    )))
                }
                None => {}
            }
        }
        self.run_cycle().await
    }

    /// Clear peaks and the stress error count
    pub async fn reset_peaks(self: &Arc<Self>) -> Result<()> {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || state.lock_monitor().reset_peaks())
            .await
            .map_err(|e| Error::Internal(format!("reset aborted: {}", e)))
    }

    /// Cycles completed by the monitor
    pub fn cycles(&self) -> u64 {
        self.lock_monitor().cycles()
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ErrorResponse {
    fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            error: err.to_string(),
        }
    }
}

/// Body of `GET /api/gpu-stats`
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StatsResponse {
    Snapshot(Snapshot),
    Failed(ErrorResponse),
}

/// Body of `/api/reset-peaks`
#[derive(Debug, Serialize)]
struct ResetResponse {
    success: bool,
    /// Error message if the reset could not run
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_gpu_stats(State(state): State<Arc<ApiState>>) -> Json<StatsResponse> {
    match state.current_snapshot().await {
        Ok(snapshot) => Json(StatsResponse::Snapshot(snapshot)),
        Err(e) => {
            log::error!("GPU stats cycle failed: {}", e);
            Json(StatsResponse::Failed(ErrorResponse::from_error(&e)))
        }
    }
}

async fn handle_reset_peaks(State(state): State<Arc<ApiState>>) -> Json<ResetResponse> {
    match state.reset_peaks().await {
        Ok(()) => Json(ResetResponse {
            success: true,
            error: None,
        }),
        Err(e) => {
            log::error!("Peak reset failed: {}", e);
            Json(ResetResponse {
                success: false,
                error: Some(e.to_string()),
            })
        }
    }
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "gpuwatch",
        "version": crate::VERSION,
        "endpoints": {
            "/api/gpu-stats": {
                "method": "GET",
                "description": "Driver versions, per-GPU metrics with peak and trend, compute processes, stress-test status",
            },
            "/api/reset-peaks": {
                "method": "GET or POST",
                "description": "Clear peak temperatures and the stress-test error count",
            },
        },
    }))
}

/// Dashboards are usually served from a different origin
async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Build the axum router.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/gpu-stats", get(handle_gpu_stats))
        .route(
            "/api/reset-peaks",
            get(handle_reset_peaks).post(handle_reset_peaks),
        )
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

/// Poll on a fixed interval, keeping the latest snapshot cached
pub fn spawn_sampler(state: Arc<ApiState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = state.run_cycle().await {
                log::error!("Background poll cycle failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

/// Run the HTTP API until Ctrl-C.
pub async fn run_server(monitor: GpuMonitor, config: &ServerConfig) -> Result<()> {
    let background = config.background_interval_ms.map(Duration::from_millis);
    let state = ApiState::new(monitor, background.is_some());

    let sampler = background.map(|interval| {
        log::info!("Background sampling every {} ms", interval.as_millis());
        spawn_sampler(Arc::clone(&state), interval)
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("gpuwatch listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(handle) = sampler {
        handle.abort();
    }
    served?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smi::fake::FakeSmi;
    use crate::smi::{Query, SmiSource};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn monitor_with_gpu(temp: f64) -> GpuMonitor {
        let fake = FakeSmi::new()
            .with(Query::DriverVersion, "535.183.01\n")
            .with(Query::Banner, "CUDA Version: 12.2")
            .with(
                Query::Devices,
                &format!("0, Tesla V100, 0, 40, 16384, 0, 0, {}, Default, 300\n", temp),
            )
            .with(Query::Processes, "");
        GpuMonitor::new(fake)
    }

    #[tokio::test]
    async fn test_gpu_stats_success() {
        let state = ApiState::new(monitor_with_gpu(55.0), false);
        let Json(resp) = handle_gpu_stats(State(state)).await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["nvidia_info"]["driver_version"], "535.183.01");
        assert_eq!(json["gpus"][0]["name"], "Tesla V100");
        assert_eq!(json["gpus"][0]["peak_temperature"], 55.0);
        assert_eq!(json["processes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_gpu_stats_without_tool() {
        let state = ApiState::new(GpuMonitor::new(FakeSmi::new()), false);
        let Json(resp) = handle_gpu_stats(State(state)).await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["gpus"], serde_json::json!([]));
        assert_eq!(json["nvidia_info"]["driver_version"], "Unknown");
        assert_eq!(json["nvidia_info"]["cuda_version"], "Unknown");
    }

    #[tokio::test]
    async fn test_gpu_stats_internal_error() {
        let fake = FakeSmi::new();
        fake.fail(Query::Processes, Error::Internal("reader crashed".to_string()));
        let state = ApiState::new(GpuMonitor::new(fake), false);
        let Json(resp) = handle_gpu_stats(State(state)).await;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("reader crashed"));
    }

    #[tokio::test]
    async fn test_reset_peaks() {
        let state = ApiState::new(monitor_with_gpu(90.0), false);
        state.run_cycle().await.unwrap();

        let Json(resp) = handle_reset_peaks(State(Arc::clone(&state))).await;
        assert!(resp.success);
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            serde_json::json!({"success": true})
        );

        let monitor = state.lock_monitor();
        assert!(monitor.thermal().peaks().is_empty());
        assert_eq!(monitor.thermal().history().get(0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_on_request_mode_polls_every_call() {
        let state = ApiState::new(monitor_with_gpu(50.0), false);
        state.current_snapshot().await.unwrap();
        state.current_snapshot().await.unwrap();
        assert_eq!(state.cycles(), 2);
    }

    #[tokio::test]
    async fn test_background_mode_serves_cache() {
        let state = ApiState::new(monitor_with_gpu(50.0), true);
        let first = state.current_snapshot().await.unwrap();
        let second = state.current_snapshot().await.unwrap();
        assert_eq!(state.cycles(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_spawn_sampler_polls() {
        let state = ApiState::new(monitor_with_gpu(50.0), true);
        let handle = spawn_sampler(Arc::clone(&state), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
        assert!(state.cycles() >= 2);
        assert!(matches!(state.cached(), Some(LatestCycle::Ready(_))));
    }

    #[tokio::test]
    async fn test_cors_header() {
        let response = allow_any_origin(Response::new(axum::body::Body::empty())).await;
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    /// Panics on its first query, then reports an empty machine
    struct PanicsOnce {
        tripped: AtomicBool,
    }

    impl SmiSource for PanicsOnce {
        fn query(&self, _query: Query) -> Result<String> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("nvidia-smi reader exploded");
            }
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_panicked_cycle_fails_once() {
        let source = PanicsOnce {
            tripped: AtomicBool::new(false),
        };
        let state = ApiState::new(GpuMonitor::new(source), false);

        let Json(first) = handle_gpu_stats(State(Arc::clone(&state))).await;
        let first = serde_json::to_value(&first).unwrap();
        assert_eq!(first["success"], false);
        assert!(first["error"].as_str().unwrap().contains("poll cycle aborted"));

        for _ in 0..2 {
            let Json(resp) = handle_gpu_stats(State(Arc::clone(&state))).await;
            let json = serde_json::to_value(&resp).unwrap();
            assert_eq!(json["success"], true);
            assert_eq!(json["gpus"], serde_json::json!([]));
        }

        let Json(reset) = handle_reset_peaks(State(state)).await;
        assert!(reset.success);
    }

    #[tokio::test]
    async fn test_background_mode_reports_failed_cycle() {
        let fake = Arc::new(
            FakeSmi::new()
                .with(Query::DriverVersion, "535.183.01\n")
                .with(Query::Processes, ""),
        );
        let state = ApiState::new(GpuMonitor::new(Arc::clone(&fake)), true);
        assert!(state.run_cycle().await.is_ok());
        assert!(state.current_snapshot().await.is_ok());

        fake.fail(Query::Processes, Error::Internal("reader crashed".to_string()));
        assert!(state.run_cycle().await.is_err());
        match state.current_snapshot().await {
            Err(Error::Internal(msg)) => assert!(msg.contains("reader crashed")),
            other => panic!("expected cached failure, got {:?}", other),
        }

        fake.set(Query::Processes, "");
        state.run_cycle().await.unwrap();
        assert!(state.current_snapshot().await.is_ok());
    }

    /// Serve the router on an ephemeral port, returning its base URL
    async fn serve(state: Arc<ApiState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_router_serves_stats_with_cors() {
        let base = serve(ApiState::new(monitor_with_gpu(61.0), false)).await;
        let resp = reqwest::get(format!("{}/api/gpu-stats", base)).await.unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["gpus"][0]["temperature"], 61.0);
    }

    #[tokio::test]
    async fn test_router_internal_failure_is_ok_status() {
        let fake = FakeSmi::new();
        fake.fail(Query::Devices, Error::Internal("reader crashed".to_string()));
        let base = serve(ApiState::new(GpuMonitor::new(fake), false)).await;

        let resp = reqwest::get(format!("{}/api/gpu-stats", base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("reader crashed"));
    }

    #[tokio::test]
    async fn test_router_reset_peaks_get_and_post() {
        let state = ApiState::new(monitor_with_gpu(88.0), false);
        let base = serve(Arc::clone(&state)).await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/reset-peaks", base);

        for request in [client.get(&url), client.post(&url)] {
            state.run_cycle().await.unwrap();
            assert!(!state.lock_monitor().thermal().peaks().is_empty());

            let resp = request.send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
            assert_eq!(resp.headers()["access-control-allow-origin"], "*");
            let json: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(json, serde_json::json!({"success": true}));
            assert!(state.lock_monitor().thermal().peaks().is_empty());
        }
    }

    #[tokio::test]
    async fn test_router_index_and_unknown_route() {
        let base = serve(ApiState::new(monitor_with_gpu(50.0), false)).await;

        let index: serde_json::Value = reqwest::get(format!("{}/", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(index["name"], "gpuwatch");
        assert!(index["endpoints"]["/api/reset-peaks"].is_object());

        let missing = reqwest::get(format!("{}/api/nope", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
