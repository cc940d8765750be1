use clap::Parser;
use std::path::PathBuf;
use std::process;

use fpga_bridge_sim::{Options, SimError, Simulator};

#[derive(Parser)]
#[command(name = "fpga-bridge-sim")]
#[command(about = "Run the FPGA bridge against a simulated core and an SD card image", long_about = None)]
#[command(version)]
struct Cli {
    /// FAT32 SD card image
    image: PathBuf,

    /// Mount an image on a drive, e.g. `0=/GAMES/DISK_A.ST` (repeatable)
    #[arg(short, long, value_parser = parse_mount)]
    mount: Vec<(usize, String)>,

    /// Let the core request `DRIVE:SECTOR` (repeatable)
    #[arg(short, long, value_parser = parse_request)]
    sector: Vec<(usize, u32)>,

    /// Poll the interrupt mask every N ms instead of waiting on the IRQ line
    #[arg(long)]
    poll_ms: Option<u32>,

    /// Core id reported by the simulated FPGA
    #[arg(long, default_value = "1")]
    core_id: u8,

    /// Initial link table capacity in cluster runs
    #[arg(long, default_value = "8")]
    link_runs: usize,

    /// Replay a scripted keyboard and gamepad session
    #[arg(long)]
    demo_hid: bool,

    /// Suppress progress output (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

fn parse_mount(s: &str) -> Result<(usize, String), SimError> {
    let (drive, path) = s
        .split_once('=')
        .ok_or_else(|| SimError::Argument(format!("expected DRIVE=PATH, got {s:?}")))?;
    let drive = drive
        .parse()
        .map_err(|_| SimError::Argument(format!("bad drive number {drive:?}")))?;
    Ok((drive, path.to_string()))
}

fn parse_request(s: &str) -> Result<(usize, u32), SimError> {
    let (drive, sector) = s
        .split_once(':')
        .ok_or_else(|| SimError::Argument(format!("expected DRIVE:SECTOR, got {s:?}")))?;
    let drive = drive
        .parse()
        .map_err(|_| SimError::Argument(format!("bad drive number {drive:?}")))?;
    let sector = sector
        .parse()
        .map_err(|_| SimError::Argument(format!("bad sector {sector:?}")))?;
    Ok((drive, sector))
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let options = Options {
        core_id: cli.core_id,
        poll_ms: cli.poll_ms,
        link_table_runs: cli.link_runs,
        ..Options::default()
    };
    let mut sim = Simulator::new(&cli.image, &options)?;
    let core = sim.core();
    if !cli.quiet {
        eprintln!(
            "Core {} detected{}",
            core.core_id,
            if core.cold_boot() { " (cold boot)" } else { "" }
        );
    }

    for (drive, path) in &cli.mount {
        let size = sim.mount(*drive, path)?;
        if !cli.quiet {
            eprintln!("Drive {}: {} ({} bytes)", drive, path, size);
        }
    }

    sim.start_irq_task()?;

    for &(drive, sector) in &cli.sector {
        let physical = sim.request_sector(drive, sector)?;
        println!("drive {} sector {} -> SD sector {}", drive, sector, physical);
    }

    if cli.demo_hid {
        let menu = sim.demo_hid()?;
        for cmd in sim.fpga().hid_commands() {
            println!("HID {:?}", cmd);
        }
        for event in menu {
            println!("menu {:?}", event);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
