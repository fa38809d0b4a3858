//! Method and version identifiers.
//!
//! A version is either a calendar date in fixed-width `YYYY-MM-DD` form or
//! one of the reserved tokens `preview` and `latest`. Because the date form
//! is fixed-width, lexicographic and chronological order agree.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::ConfigError;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn method_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$").expect("method pattern is valid")
    })
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern is valid"))
}

/// A validated snake_case method name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodName(String);

impl MethodName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        if method_pattern().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidMethod(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MethodName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Borrow<str> for MethodName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for MethodName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An API version selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// A released, dated version. Methods carry forward from here.
    Dated(NaiveDate),
    /// Unstable methods; never carried forward into dated versions.
    Preview,
    /// Read-only alias for the most recent dated version.
    Latest,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "preview" => Ok(Version::Preview),
            "latest" => Ok(Version::Latest),
            _ if date_pattern().is_match(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Version::Dated)
                .map_err(|_| ConfigError::InvalidVersion(s.to_string())),
            _ => Err(ConfigError::InvalidVersion(s.to_string())),
        }
    }

    pub fn is_dated(&self) -> bool {
        matches!(self, Version::Dated(_))
    }
}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Dated(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            Version::Preview => f.write_str("preview"),
            Version::Latest => f.write_str("latest"),
        }
    }
}
