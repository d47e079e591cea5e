//! The request method token.

use std::fmt::Display;

/// HTTP request method. Only `Get`/`Put`/`Post`/`Delete`/`Options` are
/// recognized by name; anything else parses to [`Method::Dummy`] rather
/// than failing the request outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// [RFC 9110 §9.3.1](https://www.rfc-editor.org/rfc/rfc9110#section-9.3.1)
    Get,
    /// [RFC 9110 §9.3.4](https://www.rfc-editor.org/rfc/rfc9110#section-9.3.4)
    Put,
    /// [RFC 9110 §9.3.3](https://www.rfc-editor.org/rfc/rfc9110#section-9.3.3)
    Post,
    /// [RFC 9110 §9.3.5](https://www.rfc-editor.org/rfc/rfc9110#section-9.3.5)
    Delete,
    /// [RFC 9110 §9.3.7](https://www.rfc-editor.org/rfc/rfc9110#section-9.3.7)
    Options,
    /// Any other method token.
    Dummy,
}

impl Method {
    /// Parses a method token from the start-line's first word.
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "PUT" => Self::Put,
            "POST" => Self::Post,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            _ => Self::Dummy,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Dummy => "DUMMY",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_token_is_dummy() {
        assert_eq!(Method::parse("PATCH"), Method::Dummy);
    }

    #[test]
    fn recognized_tokens_round_trip_display() {
        for (token, method) in [
            ("GET", Method::Get),
            ("PUT", Method::Put),
            ("POST", Method::Post),
            ("DELETE", Method::Delete),
            ("OPTIONS", Method::Options),
        ] {
            assert_eq!(Method::parse(token).to_string(), token);
            assert_eq!(Method::parse(token), method);
        }
    }
}
