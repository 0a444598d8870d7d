use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::{debug, error};

use hmvol::activate::Activator;
use hmvol::device::{scan_block_devs, Device};
use hmvol::dm::DmCtl;
use hmvol::fs::DevDir;
use hmvol::lock::{Flock, LockScope};
use hmvol::metadata::{initialize_pv, read_disk, read_pvs_in_vg, rename_vg, write_pvds};
use hmvol::vg::VG;
use hmvol::{Error, Result};

#[derive(Parser)]
#[command(name = "hmv", version, about = "HM-format volume manager")]
struct Cli {
    /// Directories scanned for PV devices
    #[arg(long, global = true, default_value = "/dev")]
    dev_dir: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the PVs found on the scanned devices
    Scan,
    /// Initialize a device as an orphan PV
    Pvcreate { device: PathBuf },
    /// Show a VG with its PVs, LVs and segments
    Vgdisplay { vg_name: String },
    /// Map every LV of a VG
    Activate { vg_name: String },
    /// Unmap every LV of a VG
    Deactivate { vg_name: String },
    /// Rename a VG on every one of its PVs
    Rename { old_name: String, new_name: String },
}

fn devices(dirs: &[PathBuf]) -> Result<Vec<Device>> {
    let dirs: Vec<&Path> = dirs.iter().map(|p| p.as_path()).collect();

    let mut devs = Vec::new();
    for path in scan_block_devs(&dirs)? {
        match Device::open(&path) {
            Ok(dev) => devs.push(dev),
            Err(e) => debug!("Could not open {:?}: {}", path, e),
        }
    }
    Ok(devs)
}

fn scan(dirs: &[PathBuf]) -> Result<()> {
    for dev in devices(dirs)? {
        let name = dev.name().to_owned();
        if let Some(view) = read_disk(dev, None) {
            if view.pvd.is_orphan() {
                println!("{}: orphan PV, {} sectors", name, view.pvd.pv_size);
            } else {
                println!(
                    "{}: PV of VG {}, {}/{} extents allocated",
                    name,
                    view.pvd.vg_name_str(),
                    view.pvd.pe_allocated,
                    view.pvd.pe_total
                );
            }
        }
    }
    Ok(())
}

fn pvcreate(path: &Path) -> Result<()> {
    let _lock = Flock::lock_exclusive(LockScope::Global)?;

    if read_disk(Device::open(path)?, None).is_some() {
        return Err(Error::Metadata(format!(
            "{} already contains a PV; refusing to overwrite",
            path.display()
        )));
    }

    let view = initialize_pv(Device::open(path)?)?;
    println!(
        "Physical volume {} initialized with {} extents",
        view.dev.name(),
        view.pvd.pe_total
    );
    Ok(())
}

fn load_vg(vg_name: &str, dirs: &[PathBuf]) -> Result<VG> {
    let views = read_pvs_in_vg(vg_name, devices(dirs)?)?;
    VG::assemble(vg_name, views)
}

fn vgdisplay(vg_name: &str, dirs: &[PathBuf]) -> Result<()> {
    let _lock = Flock::lock_shared(LockScope::VG(vg_name.to_string()))?;
    let vg = load_vg(vg_name, dirs)?;

    println!(
        "VG {}: extent size {} sectors, {}/{} extents in use",
        vg.name,
        vg.extent_size,
        vg.extents_in_use(),
        vg.extents()
    );
    for pv in &vg.pvs {
        println!(
            "  PV {} (#{}) {}: {}/{} extents allocated",
            pv.dev.name(),
            pv.number,
            pv.uuid,
            pv.pe_allocated,
            pv.pe_total
        );
    }
    for lv in &vg.lvs {
        println!(
            "  LV {} (#{}): {} extents, {} stripe(s), {} segment(s)",
            lv.name,
            lv.number,
            lv.allocated_le,
            lv.stripes,
            lv.segments.len()
        );
        for seg in &lv.segments {
            let areas: Vec<String> = seg
                .areas
                .iter()
                .map(|a| format!("{}:{}", vg.pvs[a.pv].dev.name(), a.pe))
                .collect();
            println!(
                "    le {}..{} on {}",
                seg.le,
                seg.le + seg.len,
                areas.join(" ")
            );
        }
    }
    Ok(())
}

fn activation(vg_name: &str, dirs: &[PathBuf], up: bool) -> Result<()> {
    let _lock = Flock::lock_exclusive(LockScope::VG(vg_name.to_string()))?;
    let vg = load_vg(vg_name, dirs)?;

    let dm = DmCtl::new()?;
    let nodes = DevDir::new();
    let engine = Activator::new(&dm, &nodes);

    if up {
        println!("Activated {} logical volume(s)", engine.activate_vg(&vg));
    } else {
        println!("Deactivated {} logical volume(s)", engine.deactivate_vg(&vg));
    }
    Ok(())
}

fn rename(old_name: &str, new_name: &str, dirs: &[PathBuf]) -> Result<()> {
    let _lock = Flock::lock_exclusive(LockScope::VG(old_name.to_string()))?;

    let mut views = read_pvs_in_vg(old_name, devices(dirs)?)?;
    rename_vg(&mut views, new_name)?;
    write_pvds(&views)?;

    println!("Volume group {} renamed to {}", old_name, new_name);
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Scan => scan(&cli.dev_dir),
        Command::Pvcreate { device } => pvcreate(device),
        Command::Vgdisplay { vg_name } => vgdisplay(vg_name, &cli.dev_dir),
        Command::Activate { vg_name } => activation(vg_name, &cli.dev_dir, true),
        Command::Deactivate { vg_name } => activation(vg_name, &cli.dev_dir, false),
        Command::Rename { old_name, new_name } => rename(old_name, new_name, &cli.dev_dir),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
