#![forbid(unsafe_code)]

//! Prints the state of every folder under the output root.

use anyhow::Result;
use clap::Parser;
use reupload_tools::{
    config::ConfigArgs,
    logging,
    store::{FolderStatus, FolderStore},
};

#[derive(Debug, Parser)]
#[command(name = "folder_status", about = "Show download and upload state per folder")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Delete incomplete folders before listing.
    #[arg(long)]
    clean: bool,

    /// Only list folders in this state.
    #[arg(long, value_parser = parse_status)]
    only: Option<FolderStatus>,
}

fn parse_status(value: &str) -> Result<FolderStatus, String> {
    [
        FolderStatus::Incomplete,
        FolderStatus::Pending,
        FolderStatus::Uploaded,
        FolderStatus::Skipped,
        FolderStatus::Conflicted,
    ]
    .into_iter()
    .find(|status| status.as_str() == value)
    .ok_or_else(|| format!("unknown state `{value}`"))
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let config = args.config.resolve()?;
    let store = FolderStore::new(&config.output_root);

    if args.clean {
        let removed = store.clean()?;
        println!("removed {} incomplete folders", removed.len());
    }

    for folder in store.folders()? {
        let status = FolderStore::status(&folder);
        if args.only.is_some_and(|only| only != status) {
            continue;
        }
        let name = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("{:<11} {name}", status.as_str());
    }

    let summary = store.summary()?;
    println!(
        "{} folders: {} pending, {} uploaded, {} noupload, {} incomplete, {} conflicted",
        summary.total(),
        summary.pending,
        summary.uploaded,
        summary.skipped,
        summary.incomplete,
        summary.conflicted
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_accepts_known_states() {
        assert_eq!(parse_status("noupload"), Ok(FolderStatus::Skipped));
        assert_eq!(parse_status("conflicted"), Ok(FolderStatus::Conflicted));
        assert!(parse_status("done").is_err());
    }
}
