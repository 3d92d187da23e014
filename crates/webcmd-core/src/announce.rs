//! Lifecycle announcements written to the terminal surface.
//!
//! Announcements are rendered bold yellow so they stand apart from the
//! remote session's own output.

use std::fmt;

/// SGR sequence opening the warning style (bold yellow).
pub const WARNING_STYLE: &str = "\x1b[33;1m";
/// SGR reset.
pub const RESET_STYLE: &str = "\x1b[0m";

/// Wrap `text` in the warning style.
pub fn warning(text: &str) -> String {
    format!("{WARNING_STYLE}{text}{RESET_STYLE}")
}

/// One warning-styled line (`text` followed by CRLF), as raw bytes.
pub fn alert_line(text: &str) -> Vec<u8> {
    warning(&format!("{text}\r\n")).into_bytes()
}

/// A connection lifecycle announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// A new connection attempt is starting.
    Connecting { endpoint: String },
    /// The socket opened.
    Connected,
    /// The socket reported an error.
    SocketError,
    /// The socket closed.
    Disconnected,
    /// The reconnect timer was armed.
    Reconnecting,
}

impl Announcement {
    /// Plain text of the announcement, without line terminator.
    pub fn text(&self) -> String {
        match self {
            Announcement::Connecting { endpoint } => format!("Connecting to {endpoint}..."),
            Announcement::Connected => "connected.".to_owned(),
            Announcement::SocketError => "websocket error.".to_owned(),
            Announcement::Disconnected => "Disconnected.".to_owned(),
            Announcement::Reconnecting => "Reconnecting...".to_owned(),
        }
    }

    /// Bytes to write to the surface: styled text plus CRLF.
    pub fn render(&self) -> Vec<u8> {
        alert_line(&self.text())
    }
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texts_match_lifecycle_messages() {
        let connecting = Announcement::Connecting {
            endpoint: "ws://localhost:8000/ws".into(),
        };
        assert_eq!(connecting.text(), "Connecting to ws://localhost:8000/ws...");
        assert_eq!(Announcement::Connected.text(), "connected.");
        assert_eq!(Announcement::SocketError.text(), "websocket error.");
        assert_eq!(Announcement::Disconnected.text(), "Disconnected.");
        assert_eq!(Announcement::Reconnecting.text(), "Reconnecting...");
    }

    #[test]
    fn render_wraps_in_warning_style() {
        let bytes = Announcement::Disconnected.render();
        assert_eq!(bytes, b"\x1b[33;1mDisconnected.\r\n\x1b[0m".to_vec());
    }

    #[test]
    fn alert_line_appends_crlf_inside_style() {
        let bytes = alert_line("Process started.");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(WARNING_STYLE));
        assert!(text.ends_with(RESET_STYLE));
        assert!(text.contains("Process started.\r\n"));
    }

    #[test]
    fn display_uses_plain_text() {
        assert_eq!(Announcement::Reconnecting.to_string(), "Reconnecting...");
    }
}
