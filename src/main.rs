use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hwcomp::backend::mdp::{FbLink, MdpBackend, DEFAULT_FB_DEVICE_DIR};
use hwcomp::backend::sysfs::{FbSysfs, DEFAULT_SYSFS_ROOT};
use hwcomp::backend::ExternalLink as _;
use hwcomp::external::hotplug::ConnectStatus;
use hwcomp::{Capabilities, Comp, Display, DisplayAttributes, ExternalDisplay, FbMap, Overlay};
use hwcomp_config::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/hwcomp/config.kdl";

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to config file (default: /etc/hwcomp/config.kdl).
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    subcommand: Option<Sub>,
}

#[derive(Subcommand)]
enum Sub {
    /// Validate the config file and exit.
    Validate,
    /// Probe the hardware, bring up the external display, and print the
    /// resulting state.
    Run {
        /// Print machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Seconds to wait for an HDMI connect event. 0 polls the current
        /// state without waiting.
        #[arg(long, default_value_t = 10)]
        wait_timeout: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| "hwcomp=debug".to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.subcommand {
        Some(Sub::Validate) => {
            load_config(&config_path, true)?;
            info!("config is valid");
            Ok(())
        }
        Some(Sub::Run { json, wait_timeout }) => {
            let config = load_config(&config_path, false)?;
            run(&config, json, wait_timeout)
        }
        None => {
            let config = load_config(&config_path, false)?;
            run(&config, false, 10)
        }
    }
}

/// Missing config files fall back to defaults unless validation was asked
/// for explicitly; malformed ones are always an error.
fn load_config(path: &Path, required: bool) -> anyhow::Result<Config> {
    if !path.exists() && !required {
        info!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(report) => {
            eprintln!("{report:?}");
            anyhow::bail!("error loading config from {}", path.display());
        }
    }
}

fn run(config: &Config, json: bool, wait_timeout: u64) -> anyhow::Result<()> {
    let sysfs_root = config
        .debug
        .sysfs_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT));
    let dev_dir = config
        .debug
        .fb_device_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FB_DEVICE_DIR));

    let caps = Capabilities::probe(&sysfs_root).context("probing pipe capabilities")?;
    info!(
        "mdp v{}: {} RGB + {} VG + {} DMA pipes",
        caps.mdp_version, caps.rgb_pipes, caps.vg_pipes, caps.dma_pipes,
    );
    let fb_map = FbMap::discover(&sysfs_root);

    let backend = MdpBackend::new(&dev_dir, fb_map);
    let overlay = Overlay::new(backend, &caps)?;
    let mut comp = Comp::new(overlay);

    match read_primary_attrs(&sysfs_root, &dev_dir) {
        Ok(attrs) => comp.publish_attrs(Display::Primary, attrs),
        Err(err) => warn!("error reading primary panel timing: {err:#}"),
    }

    if let Some(fb) = fb_map.external {
        let link = FbLink::new(FbSysfs::new(&sysfs_root, fb), &dev_dir);
        let mut external = ExternalDisplay::hdmi(link, config);

        let cancel = AtomicBool::new(false);
        let deadline = (wait_timeout > 0).then(|| Duration::from_secs(wait_timeout));
        match external.connect(&cancel, deadline) {
            ConnectStatus::Connected => {
                let primary = comp.display_attrs(Display::Primary);
                let attrs = external.configure(primary).context("configuring hdmi")?;
                comp.publish_attrs(Display::External, attrs);
            }
            status => {
                info!("no external display: {status:?}");
                external.set_hpd(false);
            }
        }
    } else {
        info!("no external framebuffer present");
    }

    if json {
        print_json(&caps, fb_map, &comp)?;
    } else {
        print_text(&comp);
    }
    Ok(())
}

fn read_primary_attrs(sysfs_root: &Path, dev_dir: &Path) -> anyhow::Result<DisplayAttributes> {
    let mut link = FbLink::new(
        FbSysfs::new(sysfs_root, FbMap::PRIMARY_FB),
        dev_dir,
    );
    link.open_device()?;
    let timing = link.read_timing()?;
    Ok(DisplayAttributes::new(timing.width, timing.height, timing.fps))
}

fn print_text(comp: &Comp<MdpBackend>) {
    for dpy in Display::ALL {
        match comp.display_attrs(dpy) {
            Some(attrs) => println!(
                "{}: {}x{}@{} vsync={}ns{}",
                dpy.name(),
                attrs.width,
                attrs.height,
                attrs.fps,
                attrs.vsync_period_ns,
                if attrs.downscale { " downscale" } else { "" },
            ),
            None => println!("{}: off", dpy.name()),
        }
    }
    print!("{}", comp.dump());
}

fn print_json(caps: &Capabilities, fb_map: FbMap, comp: &Comp<MdpBackend>) -> anyhow::Result<()> {
    let displays: Vec<_> = Display::ALL
        .iter()
        .map(|&dpy| {
            serde_json::json!({
                "display": dpy.name(),
                "fb": fb_map.fb_for(dpy),
                "attrs": comp.display_attrs(dpy),
            })
        })
        .collect();
    let status = serde_json::json!({
        "mdp_version": caps.mdp_version,
        "pipes": {
            "rgb": caps.rgb_pipes,
            "vg": caps.vg_pipes,
            "dma": caps.dma_pipes,
        },
        "displays": displays,
        "slots": comp.pipe_summary(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
