use clap::Parser;
use swarmvio::cli::{Cli, Command};
use swarmvio::{app, logging};
use swarmvio_types::SwarmVioConfig;

fn main() -> eyre::Result<()> {
    let _guard = logging::init();

    let args = Cli::parse();

    if let Some(Command::DefaultConfig) = args.command {
        let cfg = SwarmVioConfig::default();
        let value = toml::Value::try_from(&cfg)?;
        println!("{}", toml::to_string(&value)?);
        return Ok(());
    }

    let mut cfg = SwarmVioConfig::load(&args.config)?;
    if let Some(self_id) = args.self_id {
        cfg.self_id = self_id;
    }

    tracing::info!(self_id = cfg.self_id, "starting swarmvio agent");

    let handles = app::spawn(cfg)?;

    // Block the main thread until interrupted; ingestion inputs arrive on
    // `handles.image_tx`/`handles.imu_tx` from whatever process embeds or
    // drives this binary (camera/IMU transport decoding is an external
    // collaborator, spec §6 "Inputs").
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("got Ctrl-C, shutting down");
            running.store(false, std::sync::atomic::Ordering::Relaxed);
        })?;
    }
    while running.load(std::sync::atomic::Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    handles.join();
    Ok(())
}
