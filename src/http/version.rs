//! The `HTTP/x.y` version token.

use std::fmt::Display;

/// Parsed HTTP version. Only 1.0/1.1 are meaningfully handled by the
/// codec; 2/3 are recognized so a start-line mentioning them fails with a
/// clear status instead of a generic parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    Http11,
    /// `HTTP/2` — recognized, not served.
    Http2,
    /// `HTTP/3` — recognized, not served.
    Http3,
}

impl Version {
    /// Parses a version token (e.g. `HTTP/1.1`).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Self::Http10),
            "HTTP/1.1" => Some(Self::Http11),
            "HTTP/2" | "HTTP/2.0" => Some(Self::Http2),
            "HTTP/3" | "HTTP/3.0" => Some(Self::Http3),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
            Self::Http3 => "HTTP/3",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_versions() {
        assert_eq!(Version::parse("HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::parse("HTTP/0.9"), None);
    }
}
