use crate::cli::ServeArgs;
use crate::infra::{AppState, KeywordClassifier, LoggingGateway};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use interview_pipeline::config::AppConfig;
use interview_pipeline::error::AppError;
use interview_pipeline::telemetry;
use interview_pipeline::workflows::interview::Pipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir.take() {
        config.pipeline.data_dir = data_dir;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let gateway = Arc::new(LoggingGateway::new(config.pipeline.primary_community));
    let pipeline = Pipeline::open(&config.pipeline, gateway, Arc::new(KeywordClassifier)).await?;
    let scheduler = Arc::clone(&pipeline.scheduler).spawn();

    let app = with_operational_routes(pipeline.router())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        data_dir = %config.pipeline.data_dir.display(),
        "interview pipeline ready"
    );

    let served = axum::serve(listener, app).await;
    scheduler.abort();
    served?;
    Ok(())
}
