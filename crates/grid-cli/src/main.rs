use clap::{Parser, Subcommand};
use grid_core::config::{validate_all, ConfigRepo};
use grid_core::enumerate::{discover_devices, SystemPortEnumerator};
use grid_core::Device;
use shared::pagelist::parse_page_list;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gridctl", about = "Manage configuration for Grid USB-serial controllers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected Grid devices.
    Devices,
    /// Erase device non-volatile memory.
    Clear {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'd', long = "device")]
        device: Option<String>,
    },
    /// Pull the device-resident configuration to `dir`.
    Pull {
        dir: PathBuf,
        #[arg(short = 'd', long = "device")]
        device: Option<String>,
        #[arg(short = 'f', long = "force")]
        force: bool,
        #[arg(long)]
        pages: Option<String>,
        #[arg(long)]
        skip_pages: Option<String>,
    },
    /// Push `dir` back to the device.
    Push {
        dir: PathBuf,
        #[arg(short = 'd', long = "device")]
        device: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        no_store: bool,
        #[arg(long)]
        pages: Option<String>,
        #[arg(long)]
        skip_pages: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Grid(#[from] shared::GridError),
    #[error("{0}")]
    Enumerate(String),
    #[error("no Grid device found; pass -d/--device to select one explicitly")]
    NoDeviceFound,
    #[error("{0} candidate Grid devices found; pass -d/--device to select one: {1:?}")]
    AmbiguousDevice(usize, Vec<String>),
    #[error("{0} already exists and is not empty; pass -f/--force to overwrite")]
    DirNotEmpty(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::init();
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Devices => run_devices().await,
        Command::Clear { dry_run, device } => run_clear(device, dry_run).await,
        Command::Pull {
            dir,
            device,
            force,
            pages,
            skip_pages,
        } => run_pull(dir, device, force, pages, skip_pages).await,
        Command::Push {
            dir,
            device,
            dry_run,
            clear,
            no_store,
            pages,
            skip_pages,
        } => run_push(dir, device, dry_run, clear, no_store, pages, skip_pages).await,
    }
}

async fn run_devices() -> Result<(), CliError> {
    for device in discover_devices(&SystemPortEnumerator).map_err(CliError::Enumerate)? {
        println!(
            "{}\t{:04x}:{:04x}\t{}",
            device.path,
            device.vendor_id,
            device.product_id,
            device.serial_number.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Resolves `-d/--device`, or the sole auto-discovered candidate.
fn resolve_device_path(device: Option<String>) -> Result<String, CliError> {
    if let Some(path) = device {
        return Ok(path);
    }
    let candidates = discover_devices(&SystemPortEnumerator).map_err(CliError::Enumerate)?;
    match candidates.len() {
        0 => Err(CliError::NoDeviceFound),
        1 => Ok(candidates.into_iter().next().unwrap().path),
        n => Err(CliError::AmbiguousDevice(
            n,
            candidates.into_iter().map(|d| d.path).collect(),
        )),
    }
}

fn resolve_pages(
    pages: Option<String>,
    skip_pages: Option<String>,
) -> Result<(Option<BTreeSet<u8>>, Option<BTreeSet<u8>>), CliError> {
    let include = pages.map(|p| parse_page_list(&p)).transpose()?;
    let exclude = skip_pages.map(|p| parse_page_list(&p)).transpose()?;
    Ok((include, exclude))
}

async fn run_clear(device: Option<String>, dry_run: bool) -> Result<(), CliError> {
    let path = resolve_device_path(device)?;
    if dry_run {
        println!("would erase non-volatile memory on {path}");
        return Ok(());
    }
    let mut device = Device::open(&path).await?;
    device.start_editor_heartbeat();
    let result = device.erase_nvm().await;
    device.close().await;
    result?;
    println!("erased non-volatile memory on {path}");
    Ok(())
}

async fn run_pull(
    dir: PathBuf,
    device: Option<String>,
    force: bool,
    pages: Option<String>,
    skip_pages: Option<String>,
) -> Result<(), CliError> {
    if dir.exists() && dir.read_dir()?.next().is_some() && !force {
        return Err(CliError::DirNotEmpty(dir.display().to_string()));
    }
    let (include, exclude) = resolve_pages(pages, skip_pages)?;
    let path = resolve_device_path(device)?;

    let mut device = Device::open(&path).await?;
    device.start_editor_heartbeat();
    let result = pull_configs(&device, include.as_ref(), exclude.as_ref()).await;
    device.close().await;
    let configs = result?;

    let repo = ConfigRepo::new(&dir);
    repo.write(&configs)?;
    println!("pulled {} module(s) into {}", configs.len(), dir.display());
    Ok(())
}

async fn pull_configs(
    device: &Device,
    include: Option<&BTreeSet<u8>>,
    exclude: Option<&BTreeSet<u8>>,
) -> Result<Vec<shared::model::ModuleConfig>, CliError> {
    let modules = device.wait_for_modules(2_000).await;
    let mut configs = Vec::with_capacity(modules.len());
    for module in &modules {
        let mut progress = |completed, total| {
            log::debug!(
                "{} ({},{}): {completed}/{total}",
                module.type_name,
                module.position.dx,
                module.position.dy
            );
        };
        let config = device
            .fetch_module_config(module, include, exclude, Some(&mut progress))
            .await?;
        configs.push(config);
    }
    Ok(configs)
}

async fn run_push(
    dir: PathBuf,
    device: Option<String>,
    dry_run: bool,
    clear: bool,
    no_store: bool,
    pages: Option<String>,
    skip_pages: Option<String>,
) -> Result<(), CliError> {
    let (include, exclude) = resolve_pages(pages, skip_pages)?;
    let repo = ConfigRepo::new(&dir);
    let mut configs = repo.read()?;
    if let Some(include) = &include {
        filter_configs_to_pages(&mut configs, Some(include), None);
    } else if let Some(exclude) = &exclude {
        filter_configs_to_pages(&mut configs, None, Some(exclude));
    }
    if let Err(shared::GridError::Validation(issues)) = validate_all(&configs) {
        for issue in &issues {
            eprintln!("{issue}");
        }
        return Err(shared::GridError::Validation(issues).into());
    }

    if dry_run {
        println!("would push {} module(s) from {}", configs.len(), dir.display());
        return Ok(());
    }

    let path = resolve_device_path(device)?;
    let mut device = Device::open(&path).await?;
    device.start_editor_heartbeat();
    let result = push_configs(&device, &configs, clear, no_store).await;
    device.close().await;
    result?;
    println!("pushed {} module(s) from {}", configs.len(), dir.display());
    Ok(())
}

async fn push_configs(
    device: &Device,
    configs: &[shared::model::ModuleConfig],
    clear: bool,
    no_store: bool,
) -> Result<(), CliError> {
    if clear {
        device.erase_nvm().await?;
    }
    let inventory = device.wait_for_modules(2_000).await;
    let transpiler = grid_core::script::WhitespaceCollapseTranspiler;
    for config in configs {
        let target = inventory
            .iter()
            .find(|module| module.position == config.module.position);
        device
            .send_module_config(config, target, &transpiler)
            .await?;
    }
    if !no_store {
        device.store_to_flash().await?;
    }
    Ok(())
}

fn filter_configs_to_pages(
    configs: &mut [shared::model::ModuleConfig],
    include: Option<&BTreeSet<u8>>,
    exclude: Option<&BTreeSet<u8>>,
) {
    for config in configs.iter_mut() {
        config.pages.retain(|page| match (include, exclude) {
            (Some(include), _) => include.contains(&page.page),
            (_, Some(exclude)) => !exclude.contains(&page.page),
            (None, None) => true,
        });
    }
}
