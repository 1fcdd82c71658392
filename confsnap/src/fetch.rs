//! Output kinds and the format fetcher.
//!
//! A fetch is one request for one output kind over an open session. It
//! performs no retry; the device task owns the retry policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::session::Session;

/// Configuration output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputKind {
    /// Structured XML tree.
    #[serde(rename = "xml")]
    Structured,

    /// Line-oriented `set` commands.
    #[serde(rename = "set")]
    SetStyle,

    /// Raw CLI text.
    #[serde(rename = "cnf")]
    RawCli,
}

impl OutputKind {
    /// All kinds in declared collection order.
    pub const ALL: [OutputKind; 3] = [
        OutputKind::Structured,
        OutputKind::SetStyle,
        OutputKind::RawCli,
    ];

    /// File extension used for artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Structured => "xml",
            OutputKind::SetStyle => "set",
            OutputKind::RawCli => "cnf",
        }
    }

    /// Content-type tag attached to fetched bytes.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputKind::Structured => "application/xml",
            OutputKind::SetStyle => "text/x-set",
            OutputKind::RawCli => "text/plain",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" | "structured" => Ok(OutputKind::Structured),
            "set" | "set-style" => Ok(OutputKind::SetStyle),
            "cnf" | "text" | "raw" => Ok(OutputKind::RawCli),
            other => Err(format!("unknown output kind '{other}' (expected xml, set or cnf)")),
        }
    }
}

/// Collapse duplicate kinds, keeping first-occurrence order.
pub fn dedup_kinds(kinds: &[OutputKind]) -> Vec<OutputKind> {
    let mut seen = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        if !seen.contains(&kind) {
            seen.push(kind);
        }
    }
    seen
}

/// Bytes returned by one successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub kind: OutputKind,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// A fetch for one output kind failed.
#[derive(Error, Debug)]
#[error("fetching {kind} configuration failed: {cause}")]
pub struct RequestError {
    pub kind: OutputKind,
    #[source]
    pub cause: Error,
}

impl RequestError {
    /// Whether the retry policy may try this fetch again.
    pub fn is_transient(&self) -> bool {
        self.cause.is_transient()
    }
}

/// Request one output kind from an open session.
pub async fn fetch<S: Session>(session: &mut S, kind: OutputKind) -> Result<Fetched, RequestError> {
    let bytes = session
        .request(kind)
        .await
        .map_err(|cause| RequestError { kind, cause })?;

    Ok(Fetched {
        kind,
        bytes,
        content_type: kind.content_type(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!("xml".parse::<OutputKind>().unwrap(), OutputKind::Structured);
        assert_eq!("SET".parse::<OutputKind>().unwrap(), OutputKind::SetStyle);
        assert_eq!("cnf".parse::<OutputKind>().unwrap(), OutputKind::RawCli);
        assert!("json".parse::<OutputKind>().is_err());
        assert_eq!(OutputKind::RawCli.to_string(), "cnf");
    }

    #[test]
    fn test_dedup_keeps_first_order() {
        let kinds = [
            OutputKind::RawCli,
            OutputKind::Structured,
            OutputKind::RawCli,
        ];
        assert_eq!(
            dedup_kinds(&kinds),
            vec![OutputKind::RawCli, OutputKind::Structured]
        );
    }

    #[test]
    fn test_kind_serde_uses_extensions() {
        let json = serde_json::to_string(&OutputKind::ALL).unwrap();
        assert_eq!(json, r#"["xml","set","cnf"]"#);
    }
}
