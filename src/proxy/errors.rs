use crate::il;
use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// Member of a contract that cannot be intercepted or marshalled
    UnsupportedMember { member: String, reason: String },

    /// Type that cannot be proxied at all
    UnsupportedTarget { target: String, reason: String },

    InvalidSettings(String),

    /// No constructor of a proxy type accepts the given arguments
    NoMatchingConstructor { proxy: String, arguments: usize },

    /// Failure assembling or running generated code
    Assembly(il::Error),
}

impl From<il::Error> for Error {
    fn from(err: il::Error) -> Error {
        Error::Assembly(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedMember { member, reason } => {
                write!(f, "cannot intercept {}: {}", member, reason)
            }
            Error::UnsupportedTarget { target, reason } => {
                write!(f, "cannot proxy {}: {}", target, reason)
            }
            Error::InvalidSettings(message) => write!(f, "invalid settings: {}", message),
            Error::NoMatchingConstructor { proxy, arguments } => write!(
                f,
                "no constructor of {} accepts {} argument(s) of those types",
                proxy, arguments
            ),
            Error::Assembly(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Assembly(err) => Some(err),
            _ => None,
        }
    }
}
