#![forbid(unsafe_code)]

//! Downloads every video listed in the job list into its own folder under the
//! output root, skipping folders that already exist.

use anyhow::Result;
use clap::Parser;
use reupload_tools::{
    config::ConfigArgs,
    logging,
    pool::{Dispatch, run_download_phase},
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "download_videos", about = "Download the videos listed in the job list")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// How identifiers are handed to workers.
    #[arg(long, value_enum, default_value_t = Dispatch::Queue)]
    dispatch: Dispatch,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let config = args.config.resolve()?;
    info!(
        "downloading {} into {} with {} workers",
        config.job_list.display(),
        config.output_root.display(),
        config.workers
    );

    let report = run_download_phase(&config, args.dispatch)?;
    println!(
        "{} downloaded, {} already present, {} skipped, {} failed",
        report.downloaded,
        report.already_present,
        report.unavailable + report.collisions,
        report.failed + report.discarded + report.panicked
    );
    Ok(())
}
