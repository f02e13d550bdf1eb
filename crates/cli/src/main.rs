//! sdsnap CLI - hot SD-card backup to a mounted destination

use anyhow::Result;
use backup::{pipeline, Config, RunSummary, System};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing::error;

/// sdsnap - full-device backup with retention pruning
///
/// Images the running system's SD card to a timestamped file on a mounted
/// destination, verifies the image, prunes images older than the retention
/// window (never deleting the last one), and optionally shrinks the image.
#[derive(Parser)]
#[command(name = "sdsnap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Destination directory (must be a pre-existing, mounted filesystem)
    #[arg(default_value = "/mnt/backup")]
    destination: PathBuf,

    /// Delete backups older than this many days
    #[arg(default_value_t = 3)]
    retention_days: u64,

    /// Block device to image
    #[arg(long, default_value = "/dev/mmcblk0")]
    device: PathBuf,

    /// Boot partition mount, receives the forced-fsck marker during the copy
    #[arg(long, default_value = "/boot")]
    boot_dir: PathBuf,

    /// Shrink the finished image with the external shrink tool
    #[arg(long)]
    shrink: bool,

    /// Shrink tool to invoke (PATH lookup or direct path)
    #[arg(long, default_value = "pishrink.sh")]
    shrink_tool: PathBuf,

    /// Reject images smaller than this many MiB as truncated
    #[arg(long, default_value_t = 500)]
    min_size_mb: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config {
        destination: cli.destination,
        retention_days: cli.retention_days,
        source_device: cli.device,
        boot_dir: cli.boot_dir,
        shrink: cli.shrink,
        shrink_tool: cli.shrink_tool,
        min_artifact_size: cli.min_size_mb * 1024 * 1024,
        ..Config::default()
    };

    let sys = System::host(&config);
    match pipeline::run(&config, &sys) {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Backup Complete".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Host:      {}", summary.hostname);
    println!("Artifact:  {}", summary.artifact.display());
    println!(
        "Size:      {} ({} copied in {})",
        format_size(summary.artifact_size).yellow(),
        format_size(summary.bytes_copied),
        format_duration(summary.copy_elapsed.as_secs()),
    );

    if summary.prune_aborted {
        println!(
            "Pruned:    {}",
            "skipped (safety floor)".yellow()
        );
    } else if summary.pruned.is_empty() {
        println!("Pruned:    {}", "nothing expired".dimmed());
    } else {
        println!(
            "Pruned:    {} artifact(s)",
            summary.pruned.len().to_string().yellow()
        );
        for path in &summary.pruned {
            println!("           {}", path.display());
        }
    }
    if summary.prune_failures > 0 {
        println!(
            "{}",
            format!("           {} deletion(s) failed, see log", summary.prune_failures).red()
        );
    }

    if summary.shrink_attempted {
        let verdict = if summary.shrunk {
            "done".green().to_string()
        } else {
            "failed (image kept unshrunk)".yellow().to_string()
        };
        println!("Shrink:    {verdict}");
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
