use serde::Serialize;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No link; initial state, and the state after a stop
    #[default]
    Disconnected,
    /// Opening the device
    Connecting,
    /// Link open, next poll pending
    Connected,
    /// Poll sent, waiting for the station's response
    AwaitingFrame,
    /// Link dropped after an error, waiting out the backoff delay
    Faulted,
}

impl SessionState {
    /// Snake-case name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::AwaitingFrame => "awaiting_frame",
            SessionState::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
