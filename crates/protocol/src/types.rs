//! Core protocol types used across the wire.

use serde::{Deserialize, Serialize};

/// Identifier the browser assigns to a tab.
///
/// Tab ids are minted by the browser, not by this client; they are only
/// meaningful to the host on the other end of the channel.
pub type TabId = u32;

/// Which kind of automation session a controller slot holds.
///
/// At most one session exists per mode within a controller. The mode is a
/// controller-level concept: sessions themselves are identified by their
/// channel object, not by the mode they were started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// The browser's default profile.
    Normal,
    /// A private/incognito window.
    Incognito,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Normal => f.write_str("normal"),
            SessionMode::Incognito => f.write_str("incognito"),
        }
    }
}

/// Recorder UI mode reported by the host.
///
/// The initial mode is `None`; it changes only when the host emits a
/// `modeChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderMode {
    /// Recorder is idle.
    #[default]
    None,
    /// Recorder is capturing actions.
    Recording,
    /// Recorder is inspecting elements.
    Inspecting,
}

/// URL filter accepting either a single pattern or a list of patterns.
///
/// The host only understands a list, so a single pattern always serializes
/// as a one-element array: `url("https://x")` and `url(vec!["https://x"])`
/// produce identical requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UrlPatterns {
    /// A single URL pattern.
    One(String),
    /// Multiple URL patterns.
    Many(Vec<String>),
}

impl Serialize for UrlPatterns {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            UrlPatterns::One(pattern) => serializer.collect_seq(std::iter::once(pattern)),
            UrlPatterns::Many(patterns) => serializer.collect_seq(patterns),
        }
    }
}

impl UrlPatterns {
    /// Returns the patterns as a list, regardless of which form was given.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            UrlPatterns::One(pattern) => vec![pattern],
            UrlPatterns::Many(patterns) => patterns,
        }
    }
}

impl From<&str> for UrlPatterns {
    fn from(pattern: &str) -> Self {
        UrlPatterns::One(pattern.to_string())
    }
}

impl From<String> for UrlPatterns {
    fn from(pattern: String) -> Self {
        UrlPatterns::One(pattern)
    }
}

impl From<Vec<String>> for UrlPatterns {
    fn from(patterns: Vec<String>) -> Self {
        UrlPatterns::Many(patterns)
    }
}

impl From<Vec<&str>> for UrlPatterns {
    fn from(patterns: Vec<&str>) -> Self {
        UrlPatterns::Many(patterns.into_iter().map(str::to_string).collect())
    }
}

/// A test discovered by the recorder's script analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTest {
    /// Test title as written in the script.
    pub title: String,
    /// Source location of the test, when the host can report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ScriptLocation>,
}

/// Source location within an analyzed script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLocation {
    /// File name or synthetic buffer name.
    pub file: String,
    /// Line number (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_url_serializes_as_array() {
        let one = UrlPatterns::from("https://example.com");
        let many = UrlPatterns::from(vec!["https://example.com".to_string()]);

        let one_json = serde_json::to_value(&one).unwrap();
        let many_json = serde_json::to_value(&many).unwrap();

        assert_eq!(one_json, serde_json::json!(["https://example.com"]));
        assert_eq!(one_json, many_json);
    }

    #[test]
    fn url_patterns_deserialize_both_forms() {
        let one: UrlPatterns = serde_json::from_str(r#""https://x""#).unwrap();
        let many: UrlPatterns = serde_json::from_str(r#"["https://x", "https://y"]"#).unwrap();

        assert_eq!(one.into_vec(), vec!["https://x"]);
        assert_eq!(many.into_vec(), vec!["https://x", "https://y"]);
    }

    #[test]
    fn session_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(SessionMode::Incognito).unwrap(),
            serde_json::json!("incognito")
        );
        assert_eq!(SessionMode::Normal.to_string(), "normal");
    }

    #[test]
    fn recorder_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(RecorderMode::Recording).unwrap(),
            serde_json::json!("recording")
        );
        let parsed: RecorderMode = serde_json::from_str(r#""inspecting""#).unwrap();
        assert_eq!(parsed, RecorderMode::Inspecting);
    }
}
