use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Select;
use pnet::datalink;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smarttv_exerciser::config::{self, CaptureConfig, EcpConfig, InstallTimings, ScriptTimings};
use smarttv_exerciser::driver::{self, BatchSummary, DEFAULT_SKIPPED_APPS};
use smarttv_exerciser::scanner::EcpScanner;
use smarttv_exerciser::{
    AppExerciser, AppInstaller, Device, DeviceControl, ExerciseScript, PcapBackend, RokuEcpClient,
};

#[derive(Parser)]
#[command(name = "smarttv-exerciser")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exercise and install smart-TV apps while capturing their traffic", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// IP address or control URL of the target device (skips SSDP discovery).
    /// A bare address uses ECP_PORT.
    #[arg(long, global = true, env = "ECP_TARGET")]
    target: Option<String>,

    /// 1-based index of the discovered device to use
    #[arg(long, global = true)]
    device: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List ECP devices on the local network
    Discover,

    /// List network interfaces available for capture
    Interfaces,

    /// List apps installed on the selected device
    Apps {
        /// Print the list as JSON
        #[arg(long)]
        as_json: bool,
    },

    /// Exercise every installed app while capturing traffic
    Exercise {
        /// Network interface to record traffic on
        #[arg(short, long, env = "CAPTURE_INTERFACE")]
        interface: String,

        /// Directory for captures and error reports
        #[arg(short, long, env = "OUTPUT_DIR")]
        output: PathBuf,

        /// App ids to leave alone (defaults to channels that can't be removed)
        #[arg(long = "skip")]
        skip: Vec<u32>,
    },

    /// Install the apps listed in a file, one id per line
    Install {
        /// Path to the id list (`#` starts a comment line)
        #[arg(short, long)]
        apps: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_ctrlc(cancel: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if !cancel.is_cancelled() {
            eprintln!("Interrupted, finishing the current step and stopping capture...");
        }
        cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")
}

async fn discover() -> Result<Vec<Device>> {
    let timeout = config::discovery_timeout();
    println!(
        "Initiating SSDP discovery of devices. Will timeout after {} ms.",
        timeout.as_millis()
    );
    EcpScanner::new(timeout)
        .discover()
        .await
        .context("device discovery failed")
}

fn pick_device(mut devices: Vec<Device>, index: Option<usize>) -> Result<Option<Device>> {
    if devices.is_empty() {
        return Ok(None);
    }
    println!("Discovered {} device(s):", devices.len());
    for (i, device) in devices.iter().enumerate() {
        println!("  {}: {}", i + 1, device);
    }

    let selected = match index {
        Some(i) if (1..=devices.len()).contains(&i) => i - 1,
        Some(i) => bail!("device index {} out of range 1..={}", i, devices.len()),
        None if devices.len() == 1 => 0,
        None => {
            let labels: Vec<String> = devices.iter().map(ToString::to_string).collect();
            Select::new()
                .with_prompt("Select the target device")
                .items(&labels)
                .default(0)
                .interact()
                .context("device selection aborted")?
        }
    };
    Ok(Some(devices.swap_remove(selected)))
}

async fn resolve_device(cli: &Cli, ecp: &EcpConfig) -> Result<Option<Device>> {
    if let Some(target) = &cli.target {
        return Ok(Some(
            Device::from_target(target, ecp.port)
                .with_context(|| format!("invalid --target '{}'", target))?,
        ));
    }
    pick_device(discover().await?, cli.device)
}

async fn run_exercise(
    client: &RokuEcpClient,
    interface: String,
    output: PathBuf,
    skip: Vec<u32>,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let skip: HashSet<u32> = if skip.is_empty() {
        DEFAULT_SKIPPED_APPS.iter().copied().collect()
    } else {
        skip.into_iter().collect()
    };

    let backend = PcapBackend::new(CaptureConfig::default());
    let exerciser = AppExerciser::new(client, &backend, &output, interface)
        .with_script(ExerciseScript::standard(&ScriptTimings::from_env()))
        .with_cancellation(cancel.clone());

    let summary = driver::exercise_installed_apps(client, &exerciser, &skip, cancel)
        .await
        .context("could not start exercise batch")?;

    println!("Exercised {} apps: {}", summary.succeeded.len() + summary.failed.len(), summary);
    if !summary.failed.is_empty() {
        println!(
            "Error reports for failed apps are in {}",
            output.display()
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_install(
    client: &RokuEcpClient,
    apps: PathBuf,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let text = std::fs::read_to_string(&apps)
        .with_context(|| format!("could not read app list {}", apps.display()))?;
    let list = driver::parse_app_id_list(&text);
    for (line, content) in &list.malformed {
        println!("WARNING: line {} could not be parsed as an app ID: '{}'.", line, content);
    }
    if list.ids.is_empty() {
        bail!("{} did not contain any app IDs", apps.display());
    }
    println!("Successfully read {} app IDs from file.", list.ids.len());

    let installer = AppInstaller::new(client)
        .with_timings(InstallTimings::from_env())
        .with_cancellation(cancel.clone());

    match installer.install_all(&list.ids).await {
        Ok(reports) => {
            let summary = BatchSummary::from_install_reports(&reports);
            println!("Successfully installed {} apps.", summary.succeeded.len());
            for report in reports.iter().filter(|r| !r.errors.is_empty()) {
                for error in &report.errors {
                    warn!(app_id = report.app_id, error = %error, "install error");
                }
            }
            if summary.failed.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Installation failed for {} apps.", summary.failed.len());
                println!("Installation failed for apps with IDs: {}", summary.failed_list());
                Ok(ExitCode::FAILURE)
            }
        }
        Err(e) => {
            warn!(error = %e, "reconciliation failed");
            println!(
                "Installation reports could not be produced. Some apps may not have been installed."
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let cancel = CancellationToken::new();
    install_ctrlc(cancel.clone())?;

    match &cli.command {
        Commands::Interfaces => {
            for iface in datalink::interfaces() {
                let ips: Vec<String> = iface.ips.iter().map(ToString::to_string).collect();
                println!(
                    "{}{} {}",
                    iface.name,
                    if iface.is_up() { "" } else { " (down)" },
                    ips.join(", ")
                );
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Discover => {
            let devices = discover().await?;
            if devices.is_empty() {
                println!("No devices found on the local network.");
            }
            for (i, device) in devices.iter().enumerate() {
                println!("  {}: {}", i + 1, device);
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let ecp = EcpConfig::from_env();
    let Some(device) = resolve_device(&cli, &ecp).await? else {
        println!("No devices found on the local network. Terminating.");
        return Ok(ExitCode::SUCCESS);
    };
    info!(%device, "selected device");
    println!("[ Selected device: {} ]", device);

    let client = RokuEcpClient::new(device, &ecp)
        .context("failed to build control client")?;

    match cli.command {
        Commands::Apps { as_json } => {
            let listing = client.list_installed_apps().await?;
            if !listing.is_success() {
                bail!("query for installed apps failed with {}", listing.status_line());
            }
            let apps = listing.parsed.unwrap_or_default();
            if as_json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else {
                for app in &apps {
                    println!("{}", app);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exercise {
            interface,
            output,
            skip,
        } => run_exercise(&client, interface, output, skip, &cancel).await,
        Commands::Install { apps } => run_install(&client, apps, &cancel).await,
        Commands::Discover | Commands::Interfaces => Ok(ExitCode::SUCCESS),
    }
}
