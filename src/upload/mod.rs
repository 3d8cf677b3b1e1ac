//! Re-upload of downloaded folders through YouTube Studio.

pub mod driver;
pub mod secrets;
pub mod webdriver;

use anyhow::Result;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::store::FolderStore;

pub use driver::{StudioSession, UploadDriver, UploadJob, UploadReport};
pub use secrets::{Secrets, studio_url};
pub use webdriver::WebDriverSession;

/// Upload phase: drop incomplete folders, then publish every pending one.
/// The browser is only started when there is something to upload.
pub fn run_upload_phase(config: &RuntimeConfig) -> Result<UploadReport> {
    let store = FolderStore::new(&config.output_root);
    store.clean()?;
    if store.pending()?.is_empty() {
        info!("no pending folders in {}", store.root().display());
        return Ok(UploadReport::default());
    }

    let secrets = Secrets::load(&config.secrets_path)?;
    let mut session =
        WebDriverSession::connect(&config.webdriver_url, config.screenshot_dir.clone())?;
    let driver = UploadDriver::new(secrets, config.batch_size, config.batch_pause);
    Ok(driver.run(&mut session, &store)?)
}
