//! Platform definitions for CLI configuration collection.
//!
//! A platform knows how to recognise the device prompt, how to prepare a
//! fresh session for unpaged output, which command produces each output
//! kind, and which output markers mean the device rejected a command.

pub mod juniper;

use regex::bytes::Regex;

use crate::error::{Result, SessionError};
use crate::fetch::OutputKind;

/// CLI commands producing each output kind.
#[derive(Debug, Clone)]
pub struct FetchCommands {
    pub structured: String,
    pub set_style: String,
    pub raw_cli: String,
}

impl FetchCommands {
    /// Command for one output kind.
    pub fn for_kind(&self, kind: OutputKind) -> &str {
        match kind {
            OutputKind::Structured => &self.structured,
            OutputKind::SetStyle => &self.set_style,
            OutputKind::RawCli => &self.raw_cli,
        }
    }
}

/// Vendor-specific CLI behavior.
#[derive(Debug, Clone)]
pub struct PlatformDefinition {
    /// Platform name (e.g., "juniper_junos").
    pub name: String,

    /// Pattern matching the operational-mode prompt.
    pub prompt: Regex,

    /// Commands sent once after login.
    pub on_open_commands: Vec<String>,

    /// Output prefixes that mean the command was rejected.
    pub failed_when_contains: Vec<String>,

    /// Commands for each output kind.
    pub commands: FetchCommands,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,
}

impl PlatformDefinition {
    /// Look up a built-in platform by name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            juniper::PLATFORM_NAME => Ok(juniper::platform()),
            _ => Err(SessionError::UnknownPlatform {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Strip the command echo and surrounding blank lines from raw output.
    pub fn normalize_output(&self, raw: &str, command: &str) -> String {
        let mut lines = raw.lines().peekable();
        if lines
            .peek()
            .is_some_and(|first| first.trim_end().ends_with(command))
        {
            lines.next();
        }

        let mut output = lines.collect::<Vec<_>>().join("\n");
        let trimmed = output.trim_end_matches('\n').len();
        output.truncate(trimmed);
        if !output.is_empty() {
            output.push('\n');
        }
        output
    }

    /// Detect a rejected command.
    ///
    /// Only the first line with text is inspected (caret markers pointing at
    /// the offending token are skipped): configuration text may legitimately
    /// contain words such as "invalid" or "error" further down.
    pub fn detect_failure(&self, output: &str) -> Option<String> {
        let first = output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.chars().all(|c| c == '^'))?;
        let lowered = first.to_lowercase();
        self.failed_when_contains
            .iter()
            .find(|marker| lowered.starts_with(&marker.to_lowercase()))
            .map(|_| first.to_string())
    }
}
