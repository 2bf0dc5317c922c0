use anyhow::{Context, Result, bail};
use clap::Parser;
use opscache::entities::{BlockedSlot, Guest, ServiceKind, ServiceRecord};
use opscache::{
    ChannelManager, MemoryBackend, OpsCaches, RawRow, SyncConfig, SyncCoordinator, TableName,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opscache")]
#[command(about = "Runs device caches against one in-process backend and shows them converge")]
struct Cli {
    /// Debounce window for pushed changes (overrides OPSCACHE_DEBOUNCE_MS)
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Log every subscribe, unsubscribe and change event
    #[arg(long)]
    debug_realtime: bool,

    /// Number of simulated devices
    #[arg(long, default_value_t = 2)]
    devices: usize,

    /// Simulated backend round-trip latency
    #[arg(long, default_value_t = 25)]
    latency_ms: u64,
}

struct Device {
    name: String,
    caches: OpsCaches,
    coordinator: SyncCoordinator,
}

fn row(value: serde_json::Value) -> RawRow {
    value.as_object().cloned().unwrap_or_default()
}

fn seed(backend: &MemoryBackend) -> Result<()> {
    let now = chrono::Utc::now();
    backend.seed(
        TableName::Guests,
        vec![
            row(json!({"id": "g-ada", "first_name": "Ada", "last_name": "Moss", "created_at": now})),
            row(json!({"id": "g-ben", "first_name": "Ben", "last_name": "Ortiz", "created_at": now})),
        ],
    )?;
    backend.seed(
        TableName::LaundryBookings,
        vec![
            row(json!({"id": "l1", "guest_id": "g-ada", "service_date": now, "status": "waiting"})),
            row(json!({"id": "l2", "guest_id": "g-ben", "service_date": now, "status": "washer"})),
        ],
    )?;
    backend.seed(
        TableName::GuestWarnings,
        vec![row(json!({"id": "w1", "guest_id": "g-ben", "message": "check in at desk", "created_at": now}))],
    )?;
    Ok(())
}

fn summary(device: &Device) -> String {
    let l1 = device
        .caches
        .services
        .get("l1")
        .and_then(|record| record.status)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}: guests={} services={} warnings={} blocked={} l1={}",
        device.name,
        device.caches.guests.len(),
        device.caches.services.len(),
        device.caches.warnings.len(),
        device.caches.blocked_slots.len(),
        l1,
    )
}

fn guest_ids(device: &Device) -> Vec<String> {
    let mut ids: Vec<String> = device.caches.guests.records().iter().map(|g| g.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.devices == 0 {
        bail!("--devices must be at least 1");
    }

    let mut config = SyncConfig::from_env().context("reading OPSCACHE_* environment")?;
    if let Some(ms) = cli.debounce_ms {
        config = config.debounce(Duration::from_millis(ms));
    }
    if cli.debug_realtime {
        config = config.debug_realtime(true);
    }

    let backend = MemoryBackend::new().with_latency(Duration::from_millis(cli.latency_ms));
    seed(&backend)?;

    let mut devices = Vec::with_capacity(cli.devices);
    for index in 0..cli.devices {
        let caches = OpsCaches::new(Arc::new(backend.clone()), config.clone());
        let channels = ChannelManager::new(Arc::new(backend.clone()), config.debug_realtime);
        let coordinator = SyncCoordinator::start(caches.targets(), channels, &config)
            .await
            .with_context(|| format!("starting sync for device {}", index))?;
        // Subscribed before loading: commits in between arrive as events.
        caches.ensure_operational().await;
        devices.push(Device {
            name: format!("device-{}", index),
            caches,
            coordinator,
        });
    }

    for device in &devices {
        println!("loaded   {}", summary(device));
    }

    let writer = &devices[0];
    let guest = writer
        .caches
        .guests
        .add(Guest::new("Cleo", "Park"))
        .await
        .context("adding guest")?;
    match writer.caches.guests.add(Guest::new(" cleo ", "PARK")).await {
        Ok(_) => bail!("duplicate guest was accepted"),
        Err(err) => println!("rejected {}", err),
    }

    let mut patch = RawRow::new();
    patch.insert("status".into(), json!("done"));
    writer.caches.services.update("l1", patch).await.context("updating laundry")?;

    writer
        .caches
        .services
        .add(ServiceRecord::new(ServiceKind::Shower, guest.id.clone(), chrono::Utc::now()).with_slot("08:00"))
        .await
        .context("booking shower")?;
    writer
        .caches
        .blocked_slots
        .add(BlockedSlot::new("shower", chrono::Utc::now().date_naive(), "09:00"))
        .await
        .context("blocking slot")?;
    let report = writer.caches.remove_guest("g-ben").await.context("removing guest")?;
    println!("cascade  removed={} failed={}", report.removed, report.failed);

    tokio::time::sleep(config.debounce + Duration::from_millis(cli.latency_ms * 4 + 200)).await;

    for device in &devices {
        println!("synced   {}", summary(device));
        let stats = device.coordinator.stats();
        println!(
            "         events={} windows={} patched={} reloads={} echo_skips={}",
            stats.events_received,
            stats.windows_fired,
            stats.patches_applied,
            stats.reloads_issued,
            stats.echo_windows_skipped,
        );
    }

    let reference = guest_ids(&devices[0]);
    let converged = devices.iter().all(|device| guest_ids(device) == reference);
    println!("converged: {}", converged);

    for device in devices {
        device.coordinator.shutdown().await;
    }

    if !converged {
        bail!("devices did not converge");
    }
    Ok(())
}
