//! Shared types for device control. Defines the remote key set, installed app
//! records, and the soft-failure response returned by every control call.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// Buttons on the standard remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Home,
    Rev,
    Fwd,
    Play,
    Select,
    Left,
    Right,
    Down,
    Up,
    Back,
    InstantReplay,
    Info,
    Backspace,
    Search,
    Enter,
}

impl RemoteKey {
    /// Key to URL token. Single-word keys are their lowercase name.
    const TOKENS: [(RemoteKey, &'static str); 15] = [
        (RemoteKey::Home, "home"),
        (RemoteKey::Rev, "rev"),
        (RemoteKey::Fwd, "fwd"),
        (RemoteKey::Play, "play"),
        (RemoteKey::Select, "select"),
        (RemoteKey::Left, "left"),
        (RemoteKey::Right, "right"),
        (RemoteKey::Down, "down"),
        (RemoteKey::Up, "up"),
        (RemoteKey::Back, "back"),
        (RemoteKey::InstantReplay, "instantreplay"),
        (RemoteKey::Info, "info"),
        (RemoteKey::Backspace, "backspace"),
        (RemoteKey::Search, "search"),
        (RemoteKey::Enter, "enter"),
    ];

    pub const ALL: [RemoteKey; 15] = [
        RemoteKey::Home,
        RemoteKey::Rev,
        RemoteKey::Fwd,
        RemoteKey::Play,
        RemoteKey::Select,
        RemoteKey::Left,
        RemoteKey::Right,
        RemoteKey::Down,
        RemoteKey::Up,
        RemoteKey::Back,
        RemoteKey::InstantReplay,
        RemoteKey::Info,
        RemoteKey::Backspace,
        RemoteKey::Search,
        RemoteKey::Enter,
    ];

    /// The token used in the `keypress/{key}` path.
    pub fn url_token(self) -> &'static str {
        Self::TOKENS[self as usize].1
    }

    /// Enum-style name, used in logs and report notes (e.g. `INSTANT_REPLAY`).
    pub fn name(self) -> &'static str {
        match self {
            RemoteKey::Home => "HOME",
            RemoteKey::Rev => "REV",
            RemoteKey::Fwd => "FWD",
            RemoteKey::Play => "PLAY",
            RemoteKey::Select => "SELECT",
            RemoteKey::Left => "LEFT",
            RemoteKey::Right => "RIGHT",
            RemoteKey::Down => "DOWN",
            RemoteKey::Up => "UP",
            RemoteKey::Back => "BACK",
            RemoteKey::InstantReplay => "INSTANT_REPLAY",
            RemoteKey::Info => "INFO",
            RemoteKey::Backspace => "BACKSPACE",
            RemoteKey::Search => "SEARCH",
            RemoteKey::Enter => "ENTER",
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One installed (or installable) app as reported by `query/apps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDescriptor {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: String,
    pub subtype: String,
    pub version: String,
}

impl fmt::Display for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id={}, type={}, subtype={}, version={})",
            self.name, self.id, self.app_type, self.subtype, self.version
        )
    }
}

/// Response to a single control request.
///
/// Non-success statuses land here as data; callers branch on `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse<T = ()> {
    pub status: u16,
    pub reason: Option<String>,
    /// Header name to values, in the order first seen.
    pub headers: IndexMap<String, Vec<String>>,
    pub body: String,
    pub parsed: Option<T>,
}

impl<T> ControlResponse<T> {
    pub const SUCCESS: u16 = 200;

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }

    /// `"503 Service Unavailable"`, or just the code when the reason is unknown.
    pub fn status_line(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} {}", self.status, reason),
            None => self.status.to_string(),
        }
    }
}

impl ControlResponse {
    /// Bare response with no headers or body.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: IndexMap::new(),
            body: String::new(),
            parsed: None,
        }
    }
}
