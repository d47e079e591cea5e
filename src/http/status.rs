//! HTTP status codes.
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// HTTP status codes.
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 15.2.1
    Continue = 100,
    /// 15.2.2
    SwitchingProtocols = 101,
    /// 15.3.1
    Ok = 200,
    /// 15.3.2
    Created = 201,
    /// 15.3.5
    NoContent = 204,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.2
    Unauthorized = 401,
    /// 15.5.4
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.5.6
    MethodNotAllowed = 405,
    /// 15.5.9
    RequestTimeout = 408,
    /// 15.5.14
    ContentTooLarge = 413,
    /// 15.5.15
    UriTooLong = 414,
    /// 15.5.22
    UpgradeRequired = 426,
    /// 15.6.1
    InternalServerError = 500,
    /// 15.6.2
    NotImplemented = 501,
    /// 15.6.3
    BadGateway = 502,
    /// 15.6.4
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// The code's canonical reason phrase.
    pub fn reason_phrase(self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::NoContent => "No Content",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::RequestTimeout => "Request Timeout",
            Self::ContentTooLarge => "Content Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UpgradeRequired => "Upgrade Required",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Parses a 3-digit status code from a response start-line.
    pub fn parse(token: &str) -> Option<(u16, Option<Self>)> {
        let code: u16 = token.parse().ok()?;
        let known = match code {
            100 => Some(Self::Continue),
            101 => Some(Self::SwitchingProtocols),
            200 => Some(Self::Ok),
            201 => Some(Self::Created),
            204 => Some(Self::NoContent),
            400 => Some(Self::BadRequest),
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            405 => Some(Self::MethodNotAllowed),
            408 => Some(Self::RequestTimeout),
            413 => Some(Self::ContentTooLarge),
            414 => Some(Self::UriTooLong),
            426 => Some(Self::UpgradeRequired),
            500 => Some(Self::InternalServerError),
            501 => Some(Self::NotImplemented),
            502 => Some(Self::BadGateway),
            503 => Some(Self::ServiceUnavailable),
            _ => None,
        };
        Some((code, known))
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u16)
    }
}
