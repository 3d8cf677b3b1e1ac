#![forbid(unsafe_code)]

//! Uploads every pending folder to the channel named in the secrets file
//! through a WebDriver-controlled browser.

use anyhow::{Result, bail};
use clap::Parser;
use reupload_tools::{config::ConfigArgs, logging, upload::run_upload_phase};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "upload_videos", about = "Upload pending folders through YouTube Studio")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> Result<()> {
    logging::init();
    let config = Args::parse().config.resolve()?;
    info!(
        "uploading from {} via {}",
        config.output_root.display(),
        config.webdriver_url
    );

    let report = run_upload_phase(&config)?;
    println!(
        "{} uploaded, {} failed, {} marked noupload, {} deferred",
        report.uploaded, report.failed, report.skipped, report.deferred
    );
    if let Some(reason) = report.aborted {
        bail!("upload run stopped early: {reason}");
    }
    Ok(())
}
