use log::{error, info, warn};
use smart_dashboard_lib::config::{Settings, SettingsStore};
use smart_dashboard_lib::metrics::{MetricSnapshot, TelemetrySampler};
use smart_dashboard_lib::series::tracked_series;

async fn log_readings(sampler: &TelemetrySampler) {
    let mut parts = Vec::new();
    for spec in tracked_series() {
        if let Some(text) = sampler.display(&spec.id).await {
            parts.push(format!("{}={}", spec.id, text));
        }
    }
    info!("{}", parts.join(" "));

    if let Some(MetricSnapshot::Cpu(cpu)) = sampler.latest_snapshot("cpu").await {
        match cpu.frequency_mhz {
            Some(mhz) => info!("cpu clock {} MHz, {} threads", mhz, cpu.thread_count),
            None => info!("cpu clock N/A, {} threads", cpu.thread_count),
        }
    }
    if let Some(MetricSnapshot::Ram(ram)) = sampler.latest_snapshot("ram").await {
        info!(
            "ram used {:.2} GB of {} GB",
            ram.used_ram_gb, ram.total_ram_round_gb
        );
    }
    if let Some(MetricSnapshot::Gpu(gpu)) = sampler.latest_snapshot("gpu").await {
        for device in &gpu.devices {
            info!(
                "gpu{} {} temp {:?}C power {:?}W",
                device.index, device.name, device.temperature_c, device.power_usage_w
            );
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match SettingsStore::at_default_path() {
        Ok(store) => store.load(),
        Err(err) => {
            warn!("{}; using default settings", err);
            Settings::default()
        }
    };
    info!(
        "refresh every {} ms, accent {}",
        settings.graph_refresh_rate, settings.accent_colour
    );

    let sampler = match TelemetrySampler::spawn(settings.refresh_interval()) {
        Ok(sampler) => sampler,
        Err(err) => {
            error!("could not start telemetry: {}", err);
            std::process::exit(1);
        }
    };
    sampler.wait_until_ready().await;

    let mut report = tokio::time::interval(settings.refresh_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = report.tick() => log_readings(&sampler).await,
        }
    }

    info!("stopping after {} cycles", sampler.cycles_completed());
    sampler.shutdown().await;
}
