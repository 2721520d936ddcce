//! Option structs for automation host methods.
//!
//! These types represent the configuration passed to host operations.
//! They are designed for serialization to JSON-RPC and are forwarded to
//! the host unchanged.

use crate::types::{RecorderMode, SessionMode, TabId, UrlPatterns};
use serde::{Deserialize, Serialize};

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Options for starting an automation session.
///
/// Everything except `incognito` is opaque start configuration the host
/// interprets; `incognito` additionally selects which controller slot the
/// session occupies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    /// Start the session in an incognito window.
    #[serde(default, skip_serializing_if = "is_false")]
    pub incognito: bool,

    /// Delay in milliseconds applied by the host between operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_mo: Option<f64>,

    /// Directory the host saves downloads to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_path: Option<String>,

    /// Directory the host saves traces to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces_dir: Option<String>,
}

impl StartOptions {
    /// Creates new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an incognito session.
    pub fn incognito(mut self, incognito: bool) -> Self {
        self.incognito = incognito;
        self
    }

    /// Sets the slow-motion delay.
    pub fn slow_mo(mut self, slow_mo: f64) -> Self {
        self.slow_mo = Some(slow_mo);
        self
    }

    /// Sets the downloads directory.
    pub fn downloads_path(mut self, path: impl Into<String>) -> Self {
        self.downloads_path = Some(path.into());
        self
    }

    /// Sets the traces directory.
    pub fn traces_dir(mut self, dir: impl Into<String>) -> Self {
        self.traces_dir = Some(dir.into());
        self
    }

    /// Returns the controller slot these options select.
    pub fn mode(&self) -> SessionMode {
        if self.incognito {
            SessionMode::Incognito
        } else {
            SessionMode::Normal
        }
    }
}

/// Tab filter for attaching every matching tab at once.
///
/// Criteria beyond these are host-defined and not exposed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachAllOptions {
    /// Match tabs by URL pattern(s). A single string is normalized to a
    /// one-element list on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlPatterns>,

    /// Match tabs by title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Restrict matching to the current browser window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window: Option<bool>,
}

impl AttachAllOptions {
    /// Creates new default options (match every tab).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the URL filter.
    pub fn url(mut self, url: impl Into<UrlPatterns>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the title filter.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Restricts matching to the current window.
    pub fn current_window(mut self, current_window: bool) -> Self {
        self.current_window = Some(current_window);
        self
    }
}

/// Options for opening a new page in a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPageOptions {
    /// URL to open the page at (the host's default is its new-tab page).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Window to open the page in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u32>,

    /// Open the tab without focusing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
}

impl NewPageOptions {
    /// Creates new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the target window.
    pub fn window_id(mut self, window_id: u32) -> Self {
        self.window_id = Some(window_id);
        self
    }

    /// Opens the tab in the background.
    pub fn background(mut self, background: bool) -> Self {
        self.background = Some(background);
        self
    }
}

/// Options for showing the recorder UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderShowOptions {
    /// Mode to open the recorder in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RecorderMode>,

    /// Target language for generated code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RecorderShowOptions {
    /// Creates new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recorder mode.
    pub fn mode(mut self, mode: RecorderMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the code generation language.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Wire shape of an attach request for a single tab.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachParams {
    /// Tab to attach.
    pub tab_id: TabId,
}
