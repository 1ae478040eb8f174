use tracing::{error, info};

use muster_core::Result;
use muster_supervisor::Supervisor;

/// Boot everything: Discord connections, the gateway HTTP surface, health
/// probes, and a first reconcile pass. Runs until interrupted, then drains
/// the fleet in shutdown order.
pub(super) async fn cmd_start(supervisor: Supervisor) -> Result<()> {
    println!("muster v{}", env!("CARGO_PKG_VERSION"));
    println!("   agents declared: {}", supervisor.list_specs().len());
    match supervisor.engine_health().await {
        Ok(()) => println!("   container engine: ok"),
        Err(e) => println!("   container engine: unavailable ({e})"),
    }

    let probes = supervisor.start();

    let gateway = supervisor.gateway();
    let listen_addr = supervisor.gateway_listen();
    let server = tokio::spawn(async move {
        if let Err(e) = muster_gateway::serve_http(gateway, &listen_addr).await {
            error!(error = %e, "gateway HTTP surface failed");
        }
    });

    let report = supervisor.reconcile().await;
    info!(
        deployed = report.deployed.len(),
        adopted = report.adopted.len(),
        orphans = report.orphans_stopped.len(),
        "initial reconcile complete"
    );
    for err in &report.errors {
        error!(error = %err, "reconcile issue");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(muster_core::MusterError::Io)?;
    println!("\nshutting down…");

    supervisor.shutdown(10).await;
    probes.abort();
    server.abort();
    Ok(())
}
