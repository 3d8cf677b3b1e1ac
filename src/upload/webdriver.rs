//! YouTube Studio automation over the W3C WebDriver protocol.
//!
//! [`WebDriverClient`] speaks plain HTTP+JSON to a running driver
//! (geckodriver, chromedriver, a Selenium grid). [`WebDriverSession`] runs the
//! Studio login and upload dialogs on top of any [`Browser`].

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use base64::Engine;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::driver::{StudioSession, UploadJob};
use super::secrets::Secrets;
use crate::error::UploadError;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

const EMAIL_INPUT: &str = r#"input[type="email"]"#;
const EMAIL_NEXT: &str = "#identifierNext";
const PASSWORD_INPUT: &str = r#"input[type="password"]"#;
const PASSWORD_NEXT: &str = "#passwordNext";
const CREATE_BUTTON: &str = "ytcp-button#create-icon";
const UPLOAD_MENU_ITEM: &str = "tp-yt-paper-item#text-item-0";
const FILE_INPUT: &str = r#"input[type="file"]"#;
const UPLOAD_DIALOG_HEADING: &str = r#"h1[class="style-scope ytcp-uploads-dialog"]"#;
const UPLOAD_LIMIT_ERROR: &str = "#error-message.error-details.ytcp-uploads-dialog";
const TEXT_INPUTS: &str = "#input";
const TEXTBOX: &str = "div#textbox";
const THUMBNAIL_INPUT: &str = r#"ytcp-thumbnails-compact-editor-uploader-old input[type="file"]"#;
const NOT_FOR_KIDS: &str = r#"tp-yt-paper-radio-button[name="VIDEO_MADE_FOR_KIDS_NOT_MFK"]"#;
const VISIBILITY_STEP: &str = "#step-badge-3";
const PUBLIC_VISIBILITY: &str = r#"tp-yt-paper-radio-button[name="PUBLIC"]"#;
const DONE_BUTTON: &str = "#done-button.ytcp-uploads-dialog";
const CLOSE_DIALOG_BUTTONS: &[&str] = &[
    "ytcp-button#close-button",
    "#close-button.ytcp-uploads-still-processing-dialog",
    "#close-button.ytcp-video-share-dialog",
];

/// Opaque element reference handed out by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("webdriver unreachable: {0}")]
    Transport(String),
    #[error("browser session is gone: {0}")]
    InvalidSession(String),
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("{error}: {message}")]
    Command { error: String, message: String },
    #[error("unexpected webdriver response: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Transport and session loss end the run; everything else belongs to
    /// the current upload step.
    fn at(self, step: &str) -> UploadError {
        match self {
            Self::Transport(_) | Self::InvalidSession(_) => UploadError::Session(self.to_string()),
            other => UploadError::ui(step, other.to_string()),
        }
    }
}

/// The handful of WebDriver commands the Studio flow needs.
pub trait Browser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;
    fn find_all(&mut self, selector: &str) -> Result<Vec<ElementId>, BrowserError>;
    fn find_all_within(
        &mut self,
        parent: &ElementId,
        selector: &str,
    ) -> Result<Vec<ElementId>, BrowserError>;
    fn click(&mut self, element: &ElementId) -> Result<(), BrowserError>;
    fn clear(&mut self, element: &ElementId) -> Result<(), BrowserError>;
    fn send_keys(&mut self, element: &ElementId, text: &str) -> Result<(), BrowserError>;
    fn is_displayed(&mut self, element: &ElementId) -> Result<bool, BrowserError>;
    fn refresh(&mut self) -> Result<(), BrowserError>;
    fn screenshot_png(&mut self) -> Result<Vec<u8>, BrowserError>;
    fn quit(&mut self) -> Result<(), BrowserError>;
}

/// Minimal blocking WebDriver client over `ureq`.
pub struct WebDriverClient {
    agent: ureq::Agent,
    session_url: String,
}

impl WebDriverClient {
    /// Starts a headless Firefox session on the driver at `server_url`.
    pub fn connect(server_url: &str) -> Result<Self, BrowserError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(COMMAND_TIMEOUT)
            .build();
        let server = server_url.trim_end_matches('/');
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "firefox",
                    "moz:firefoxOptions": { "args": ["-headless"] }
                }
            }
        });
        let value = send(agent.post(&format!("{server}/session")), Some(capabilities))?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("new session without sessionId".into()))?;
        debug!("webdriver session {session_id} started");
        Ok(Self {
            session_url: format!("{server}/session/{session_id}"),
            agent,
        })
    }

    fn get(&self, path: &str) -> Result<Value, BrowserError> {
        send(self.agent.get(&format!("{}{path}", self.session_url)), None)
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, BrowserError> {
        send(
            self.agent.post(&format!("{}{path}", self.session_url)),
            Some(body),
        )
    }

    fn find(&self, path: &str, selector: &str) -> Result<Vec<ElementId>, BrowserError> {
        let value = self.post(path, json!({ "using": "css selector", "value": selector }))?;
        parse_elements(&value)
    }
}

impl Browser for WebDriverClient {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.post("/url", json!({ "url": url })).map(drop)
    }

    fn find_all(&mut self, selector: &str) -> Result<Vec<ElementId>, BrowserError> {
        self.find("/elements", selector)
    }

    fn find_all_within(
        &mut self,
        parent: &ElementId,
        selector: &str,
    ) -> Result<Vec<ElementId>, BrowserError> {
        self.find(&format!("/element/{}/elements", parent.0), selector)
    }

    fn click(&mut self, element: &ElementId) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .map(drop)
    }

    fn clear(&mut self, element: &ElementId) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .map(drop)
    }

    fn send_keys(&mut self, element: &ElementId, text: &str) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/value", element.0), json!({ "text": text }))
            .map(drop)
    }

    fn is_displayed(&mut self, element: &ElementId) -> Result<bool, BrowserError> {
        let value = self.get(&format!("/element/{}/displayed", element.0))?;
        value
            .as_bool()
            .ok_or_else(|| BrowserError::Protocol(format!("displayed returned {value}")))
    }

    fn refresh(&mut self) -> Result<(), BrowserError> {
        self.post("/refresh", json!({})).map(drop)
    }

    fn screenshot_png(&mut self) -> Result<Vec<u8>, BrowserError> {
        let value = self.get("/screenshot")?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("screenshot without data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| BrowserError::Protocol(format!("screenshot data: {err}")))
    }

    fn quit(&mut self) -> Result<(), BrowserError> {
        send(self.agent.delete(&self.session_url), None).map(drop)
    }
}

fn send(request: ureq::Request, body: Option<Value>) -> Result<Value, BrowserError> {
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            return Err(parse_status_error(code, &body));
        }
        Err(ureq::Error::Transport(err)) => {
            return Err(BrowserError::Transport(err.to_string()));
        }
    };
    let mut payload: Value = response
        .into_json()
        .map_err(|err| BrowserError::Protocol(err.to_string()))?;
    Ok(payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Decodes the `{"value": {"error": .., "message": ..}}` body of a failed
/// command.
fn parse_status_error(code: u16, body: &str) -> BrowserError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|value| value.get("value"));
    let field = |name: &str| {
        detail
            .and_then(|detail| detail.get(name))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let Some(error) = field("error") else {
        return BrowserError::Command {
            error: format!("HTTP {code}"),
            message: body.trim().to_string(),
        };
    };
    let message = field("message").unwrap_or_default();
    match error.as_str() {
        "no such element" => BrowserError::NoSuchElement(message),
        "invalid session id" | "session not created" => BrowserError::InvalidSession(message),
        _ => BrowserError::Command { error, message },
    }
}

fn parse_elements(value: &Value) -> Result<Vec<ElementId>, BrowserError> {
    let items = value
        .as_array()
        .ok_or_else(|| BrowserError::Protocol(format!("expected element list, got {value}")))?;
    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| ElementId(id.to_string()))
                .ok_or_else(|| BrowserError::Protocol(format!("not an element reference: {item}")))
        })
        .collect()
}

/// How long to wait for UI elements and for dialogs to settle.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub element_timeout: Duration,
    pub poll_interval: Duration,
    pub settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            settle: Duration::from_secs(4),
        }
    }
}

/// [`StudioSession`] that drives the Studio web UI through a [`Browser`].
pub struct WebDriverSession<B = WebDriverClient> {
    browser: B,
    timing: Timing,
    screenshot_dir: Option<PathBuf>,
}

impl WebDriverSession<WebDriverClient> {
    pub fn connect(server_url: &str, screenshot_dir: Option<PathBuf>) -> Result<Self, UploadError> {
        let browser = WebDriverClient::connect(server_url)
            .map_err(|err| UploadError::Session(format!("starting browser: {err}")))?;
        Ok(Self::with_browser(browser, Timing::default(), screenshot_dir))
    }
}

impl<B: Browser> WebDriverSession<B> {
    pub fn with_browser(browser: B, timing: Timing, screenshot_dir: Option<PathBuf>) -> Self {
        Self {
            browser,
            timing,
            screenshot_dir,
        }
    }

    /// Polls until `selector` matches, returning the first match.
    fn wait_for(&mut self, step: &str, selector: &str) -> Result<ElementId, UploadError> {
        let deadline = Instant::now() + self.timing.element_timeout;
        loop {
            let found = self.browser.find_all(selector).map_err(|err| err.at(step))?;
            if let Some(element) = found.into_iter().next() {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(UploadError::ui(
                    step,
                    format!("timed out waiting for `{selector}`"),
                ));
            }
            thread::sleep(self.timing.poll_interval);
        }
    }

    fn wait_click(&mut self, step: &str, selector: &str) -> Result<(), UploadError> {
        let element = self.wait_for(step, selector)?;
        self.browser.click(&element).map_err(|err| err.at(step))
    }

    fn type_into(&mut self, step: &str, element: &ElementId, text: &str) -> Result<(), UploadError> {
        self.browser.clear(element).map_err(|err| err.at(step))?;
        self.browser
            .send_keys(element, text)
            .map_err(|err| err.at(step))
    }

    fn sign_in(&mut self, studio_url: &str, secrets: &Secrets) -> Result<(), UploadError> {
        self.browser
            .navigate(studio_url)
            .map_err(|err| err.at("open studio"))?;
        let email = self.wait_for("email", EMAIL_INPUT)?;
        self.type_into("email", &email, &secrets.username)?;
        self.wait_click("email", EMAIL_NEXT)?;
        let password = self.wait_for("password", PASSWORD_INPUT)?;
        self.type_into("password", &password, &secrets.password)?;
        self.wait_click("password", PASSWORD_NEXT)?;
        self.wait_for("dashboard", CREATE_BUTTON).map(drop)
    }

    fn run_upload(&mut self, job: &UploadJob) -> Result<(), UploadError> {
        self.wait_click("open create menu", CREATE_BUTTON)?;
        self.wait_click("open upload dialog", UPLOAD_MENU_ITEM)?;
        let input = self.wait_for("select file", FILE_INPUT)?;
        let video = absolute(&job.video);
        self.browser
            .send_keys(&input, &video)
            .map_err(|err| err.at("select file"))?;
        self.wait_for("upload dialog", UPLOAD_DIALOG_HEADING)?;
        self.check_upload_limit()?;

        self.fill_details(job)?;
        if let Some(thumbnail) = &job.thumbnail {
            self.set_thumbnail(thumbnail)?;
        } else {
            warn!("no thumbnail for {}", job.title);
        }

        self.wait_click("audience", NOT_FOR_KIDS)?;
        self.wait_click("visibility step", VISIBILITY_STEP)?;
        self.wait_click("visibility", PUBLIC_VISIBILITY)?;
        self.wait_click("publish", DONE_BUTTON)?;
        if !self.timing.settle.is_zero() {
            thread::sleep(self.timing.settle);
        }
        self.close_secondary_dialog()
    }

    fn check_upload_limit(&mut self) -> Result<(), UploadError> {
        let step = "upload limit";
        for element in self
            .browser
            .find_all(UPLOAD_LIMIT_ERROR)
            .map_err(|err| err.at(step))?
        {
            if self
                .browser
                .is_displayed(&element)
                .map_err(|err| err.at(step))?
            {
                return Err(UploadError::LimitReached);
            }
        }
        Ok(())
    }

    /// The title box is the first `#input` that holds a textbox; the
    /// description box is always the last one.
    fn fill_details(&mut self, job: &UploadJob) -> Result<(), UploadError> {
        let step = "details";
        self.wait_for(step, TEXT_INPUTS)?;
        let inputs = self
            .browser
            .find_all(TEXT_INPUTS)
            .map_err(|err| err.at(step))?;

        let mut title_box = None;
        for input in inputs.iter().take(2) {
            let boxes = self
                .browser
                .find_all_within(input, TEXTBOX)
                .map_err(|err| err.at(step))?;
            if let Some(found) = boxes.into_iter().next() {
                title_box = Some(found);
                break;
            }
        }
        let title_box = title_box.ok_or_else(|| UploadError::ui("title", "no title textbox"))?;
        self.type_into("title", &title_box, &job.title)?;

        let description_box = match inputs.last() {
            Some(last) => self
                .browser
                .find_all_within(last, TEXTBOX)
                .map_err(|err| err.at("description"))?
                .into_iter()
                .next(),
            None => None,
        }
        .ok_or_else(|| UploadError::ui("description", "no description textbox"))?;
        self.type_into("description", &description_box, &job.description)
    }

    /// A thumbnail the page refuses is logged, not fatal.
    fn set_thumbnail(&mut self, thumbnail: &Path) -> Result<(), UploadError> {
        let step = "thumbnail";
        let inputs = self
            .browser
            .find_all(THUMBNAIL_INPUT)
            .map_err(|err| err.at(step))?;
        let Some(input) = inputs.into_iter().next() else {
            warn!("thumbnail uploader not found; keeping the generated one");
            return Ok(());
        };
        match self.browser.send_keys(&input, &absolute(thumbnail)) {
            Ok(()) => Ok(()),
            Err(err) => match err.at(step) {
                err if err.is_session_level() => Err(err),
                err => {
                    warn!("{err}");
                    Ok(())
                }
            },
        }
    }

    fn close_secondary_dialog(&mut self) -> Result<(), UploadError> {
        let step = "close dialog";
        for selector in CLOSE_DIALOG_BUTTONS {
            let found = self
                .browser
                .find_all(selector)
                .map_err(|err| err.at(step))?;
            if let Some(button) = found.into_iter().next() {
                return self.browser.click(&button).map_err(|err| err.at(step));
            }
        }
        warn!("secondary dialog could not be closed; reloading the page");
        self.browser.refresh().map_err(|err| err.at(step))
    }

    fn save_screenshot(&mut self, job: &UploadJob, step: &str) {
        let Some(dir) = self.screenshot_dir.clone() else {
            return;
        };
        let name = format!("{}-{}.png", job.name(), step.replace(' ', "_"));
        let path = dir.join(name);
        let result = self
            .browser
            .screenshot_png()
            .map_err(|err| err.to_string())
            .and_then(|png| {
                fs::create_dir_all(&dir)
                    .and_then(|()| fs::write(&path, png))
                    .map_err(|err| err.to_string())
            });
        match result {
            Ok(()) => info!("saved screenshot {}", path.display()),
            Err(err) => warn!("could not save screenshot {}: {err}", path.display()),
        }
    }
}

impl<B: Browser> StudioSession for WebDriverSession<B> {
    fn login(&mut self, studio_url: &str, secrets: &Secrets) -> Result<(), UploadError> {
        self.sign_in(studio_url, secrets).map_err(|err| match err {
            UploadError::Session(_) => err,
            other => UploadError::Session(format!("login failed: {other}")),
        })
    }

    fn upload(&mut self, job: &UploadJob) -> Result<(), UploadError> {
        let result = self.run_upload(job);
        if let Err(UploadError::Ui { step, .. }) = &result {
            let step = step.clone();
            self.save_screenshot(job, &step);
        }
        result
    }

    fn close(&mut self) -> Result<(), UploadError> {
        self.browser.quit().map_err(|err| err.at("close"))
    }
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
