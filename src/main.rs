use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use pulseburn::ble::BleHeartRateDevice;
use pulseburn::cache::{self, LocalCache};
use pulseburn::device::HeartRateDevice;
use pulseburn::logging::{self, LogFormat};
use pulseburn::osc::OscPublisher;
use pulseburn::settings::{self, AppSettings, SettingsStore};
use pulseburn::simulated::{SimulatedDevice, SimulatedStrap};
use pulseburn::{BiologicalSex, PhysiologicalProfile, WatchController};

const SETTINGS_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "pulseburn", version, about = "Live calorie burn from a BLE heart rate wearable")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a wearable and stream heart rate and calories until Ctrl-C
    Watch(WatchArgs),
    /// Inspect or reset the persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Forget everything cached locally
    SignOut,
}

#[derive(clap::Args)]
struct WatchArgs {
    /// Use an in-process simulated strap instead of Bluetooth
    #[arg(long)]
    simulate: bool,
    #[arg(long)]
    weight_kg: Option<f64>,
    #[arg(long)]
    age: Option<f64>,
    #[arg(long)]
    sex: Option<BiologicalSex>,
    /// Only connect to devices whose name contains this
    #[arg(long)]
    device_name: Option<String>,
    /// Publish telemetry over OSC to this port
    #[arg(long, env = "PULSEBURN_OSC_PORT")]
    osc_port: Option<u16>,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Reset,
}

fn open_cache() -> Result<LocalCache> {
    Ok(LocalCache::open(settings::app_data_dir()?.join("cache.json")))
}

/// Profile fields given on the command line. They win over `settings.json`.
#[derive(Debug, Clone, Copy, Default)]
struct ProfileOverrides {
    weight_kg: Option<f64>,
    age: Option<f64>,
    sex: Option<BiologicalSex>,
}

impl From<&WatchArgs> for ProfileOverrides {
    fn from(args: &WatchArgs) -> Self {
        Self {
            weight_kg: args.weight_kg,
            age: args.age,
            sex: args.sex,
        }
    }
}

fn resolve_profile(settings: &AppSettings, overrides: &ProfileOverrides) -> PhysiologicalProfile {
    let mut profile = settings.profile;

    if let Some(weight_kg) = overrides.weight_kg {
        profile.weight_kg = weight_kg;
    }
    if let Some(age) = overrides.age {
        profile.age_years = age;
    }
    if let Some(sex) = overrides.sex {
        profile.sex = sex;
    }

    profile
}

/// Commands typed on stdin while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    ResetCalories,
    Quit,
}

fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "reset" => Some(ConsoleCommand::ResetCalories),
        "q" | "quit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

fn start_simulation(mut straps: mpsc::UnboundedReceiver<SimulatedStrap>) {
    tokio::spawn(async move {
        while let Some(strap) = straps.recv().await {
            tokio::spawn(async move {
                // Warm-up, work, cool-down.
                strap.play_ramp(70, 150, Duration::from_millis(500)).await;
                strap.play_ramp(150, 95, Duration::from_millis(500)).await;
            });
        }
    });
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let store = SettingsStore::open_default()?;
    let settings = store.read().context("Failed to load settings")?;
    let mut cache = open_cache()?;

    let overrides = ProfileOverrides::from(&args);
    let profile = resolve_profile(&settings, &overrides);
    cache.set(cache::KEY_METRICS, &profile)?;
    info!(weight_kg = profile.weight_kg, age = profile.age_years, sex = ?profile.sex, "Using profile");

    if let Some(last) = cache.get::<f64>(cache::KEY_LAST_SESSION_KCAL) {
        info!(kcal = %format!("{last:.1}"), "Previous session burn");
    }

    let (profile_tx, profile_rx) = watch::channel(profile);
    let controller = WatchController::new(profile_rx);
    tokio::spawn(settings::follow_profile(
        store.clone(),
        SETTINGS_RELOAD_INTERVAL,
        profile_tx,
        move |settings| resolve_profile(settings, &overrides),
    ));

    let device: Arc<dyn HeartRateDevice> = if args.simulate {
        let (device, straps) = SimulatedDevice::new("Simulated Strap");
        start_simulation(straps);
        Arc::new(device)
    } else {
        let name_filter = args.device_name.clone().or(settings.device_name_filter.clone());
        Arc::new(BleHeartRateDevice::new(name_filter, settings.scan_timeout()))
    };

    let osc_port = args.osc_port.or(settings.publish_osc.then_some(settings.osc_port));
    let mut publisher = match osc_port {
        Some(port) => {
            let addr: SocketAddr = format!("{}:{}", settings.osc_address, port)
                .parse()
                .context("Invalid OSC address")?;
            info!(%addr, "Publishing telemetry over OSC");
            Some(OscPublisher::new(&addr)?)
        }
        None => None,
    };

    let device_name = controller
        .connect(Arc::clone(&device))
        .await
        .context("Bluetooth connection failed")?;
    info!(device = %device_name, "Streaming heart rate, type 'r' to reset calories, 'q' or Ctrl-C to stop");

    let mut updates = controller.subscribe();
    let mut console = Some(BufReader::new(tokio::io::stdin()).lines());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = async { console.as_mut()?.next_line().await.ok().flatten() }, if console.is_some() => {
                let Some(line) = line else {
                    // stdin closed, keep streaming
                    console = None;
                    continue;
                };

                match parse_console_command(&line) {
                    Some(ConsoleCommand::ResetCalories) => {
                        controller.reset_accumulator();
                        info!("Session calories reset");
                    }
                    Some(ConsoleCommand::Quit) => break,
                    None => warn!(input = %line.trim(), "Unknown command"),
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }

                let data = updates.borrow_and_update().clone();
                info!(
                    bpm = ?data.heart_rate,
                    kcal = %format!("{:.1}", data.calories_burned),
                    connected = data.is_connected,
                    "Telemetry"
                );

                if let Some(publisher) = publisher.as_mut() {
                    if let Err(err) = publisher.publish(&data) {
                        warn!(error = %err, "Failed to publish OSC telemetry");
                    }
                }

                if !data.is_connected {
                    warn!("Device disconnected");
                    break;
                }
            }
        }
    }

    if let Err(err) = controller.disconnect().await {
        error!(error = %err, "Error while disconnecting");
    }

    let total = controller.snapshot().calories_burned;
    cache.set(cache::KEY_LAST_SESSION_KCAL, &total)?;
    info!(kcal = %format!("{total:.1}"), "Session finished");

    Ok(())
}

fn run_settings(action: SettingsAction) -> Result<()> {
    let store = SettingsStore::open_default()?;
    let settings = match action {
        SettingsAction::Show => store.read()?,
        SettingsAction::Reset => store.reset()?,
    };

    println!("{}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info", LogFormat::from_env())?;

    let cli = Cli::parse();
    match cli.command {
        Command::Watch(args) => run_watch(args).await,
        Command::Settings { action } => run_settings(action),
        Command::SignOut => {
            open_cache()?.clear()?;
            info!("Local cache cleared");
            Ok(())
        }
    }
}
