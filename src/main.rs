//! Snapshot Provisioner
//!
//! Restores VolumeSnapshots into PersistentVolumes for claims carrying the
//! `snapshot.alpha.kubernetes.io/snapshot` annotation.

use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snapshot_provisioner::controller::{self, Context};
use snapshot_provisioner::plugins::{GlusterConfig, HostPathConfig, OpenEbsConfig};
use snapshot_provisioner::{
    build_registry, install_crds, wait_for_crds, Error, KubeSnapshotStore, PluginConfig,
    ProvisionerMetrics, Result, SnapshotProvisioner, PROVISIONER_NAME,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Snapshot Provisioner - restore PersistentVolumes from VolumeSnapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unique provisioner identity, stamped on every volume it creates
    #[arg(long, env = "PROVISIONER_ID")]
    id: Option<String>,

    /// Provisioner name StorageClasses refer to
    #[arg(long, env = "PROVISIONER_NAME", default_value = PROVISIONER_NAME)]
    provisioner_name: String,

    /// Create the snapshot CRDs on startup
    #[arg(long, env = "INSTALL_CRDS")]
    install_crds: bool,

    /// Directory receiving restored hostPath volumes
    #[arg(long, env = "HOSTPATH_RESTORE_ROOT", default_value = "/tmp/restore/hostpath")]
    hostpath_restore_root: PathBuf,

    /// Path of the gluster CLI
    #[arg(long, env = "GLUSTER_BINARY", default_value = "gluster")]
    gluster_binary: String,

    /// Default Endpoints object for GlusterFS volumes
    #[arg(long, env = "GLUSTER_ENDPOINT", default_value = "glusterfs-cluster")]
    gluster_endpoint: String,

    /// OpenEBS control-plane API address
    #[arg(long, env = "MAPI_ADDR", default_value = "http://maya-apiserver-service:5656")]
    openebs_api_url: String,

    /// Timeout for OpenEBS API requests in seconds
    #[arg(long, env = "OPENEBS_TIMEOUT", default_value = "30")]
    openebs_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let identity = args
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| args.provisioner_name.clone());

    info!("Starting Snapshot Provisioner");
    info!("  Version: {}", snapshot_provisioner::VERSION);
    info!("  Provisioner: {}", args.provisioner_name);
    info!("  Identity: {}", identity);

    let client = kube::Client::try_default().await?;

    if args.install_crds {
        install_crds(client.clone()).await?;
        wait_for_crds(client.clone()).await?;
    }

    let plugin_config = PluginConfig {
        hostpath: HostPathConfig {
            restore_root: args.hostpath_restore_root.clone(),
        },
        gluster: GlusterConfig {
            binary: args.gluster_binary.clone(),
            default_endpoint: args.gluster_endpoint.clone(),
        },
        openebs: OpenEbsConfig {
            api_url: args.openebs_api_url.clone(),
            request_timeout: Duration::from_secs(args.openebs_timeout_secs),
            ..Default::default()
        },
    };
    let registry = Arc::new(build_registry(&plugin_config)?);
    info!("Plugin registry initialized ({} plugins)", registry.len());

    let metrics_registry = Registry::new();
    let metrics = ProvisionerMetrics::new(&metrics_registry)?;

    let provisioner = SnapshotProvisioner::new(
        identity,
        Arc::new(KubeSnapshotStore::new(client.clone())),
        registry,
        metrics,
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let ctx = Arc::new(Context {
        client,
        provisioner: Arc::new(provisioner),
        provisioner_name: args.provisioner_name.clone(),
    });
    controller::run(ctx).await;

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Registry) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let registry = Arc::new(registry);
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = text_response(StatusCode::OK, buffer);
                                    if let Ok(value) = encoder.format_type().parse() {
                                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => text_response(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    e.to_string(),
                                ),
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
