#![forbid(unsafe_code)]

//! Download everything in the job list, upload what is pending, then drop any
//! folder left incomplete.

use anyhow::{Context, Result};
use clap::Parser;
use reupload_tools::{
    config::ConfigArgs,
    logging,
    pool::{Dispatch, run_download_phase},
    store::FolderStore,
    upload::run_upload_phase,
};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "run_pipeline", about = "Download, upload and clean up in one go")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long, value_enum, default_value_t = Dispatch::Queue)]
    dispatch: Dispatch,

    /// Stop after the download phase.
    #[arg(long)]
    skip_upload: bool,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let config = args.config.resolve()?;

    let downloads = run_download_phase(&config, args.dispatch).context("download phase")?;
    info!("{} new folders", downloads.downloaded);

    let upload_result = if args.skip_upload {
        Ok(())
    } else {
        run_upload_phase(&config).map(|report| {
            info!("{} uploaded, {} failed", report.uploaded, report.failed);
            if let Some(reason) = report.aborted {
                error!("upload run stopped early: {reason}");
            }
        })
    };

    let removed = FolderStore::new(&config.output_root).clean()?;
    info!("removed {} incomplete folders", removed.len());
    upload_result.context("upload phase")
}
