//! Juniper JUNOS platform definition.
//!
//! Configuration is collected from operational mode, so only the exec
//! prompt is needed. Prompt patterns are adapted from
//! [scrapli](https://github.com/carlmontanari/scrapli).
//!
//! # Prompt Examples
//!
//! ```text
//! user@router>              # exec mode
//! {master:0}                # routing-engine indicator (separate line)
//! user@router>              # exec prompt on next line
//! ```
//!
//! # Output kinds
//!
//! ```text
//! structured  show configuration | display xml
//! set-style   show configuration | display set
//! raw-CLI     show configuration
//! ```

use regex::bytes::Regex;

use super::{FetchCommands, PlatformDefinition};

/// Platform name for Juniper JUNOS.
pub const PLATFORM_NAME: &str = "juniper_junos";

/// Exec (operational) mode prompt, optionally preceded by a `{master:0}` line.
const EXEC_PROMPT: &str = r"(?mi)^(\{\w+(:(\w+)?\d)?\}\n)?[\w\-@()/:\.]{1,63}>\s?$";

/// Create the Juniper JUNOS platform definition.
pub fn platform() -> PlatformDefinition {
    PlatformDefinition {
        name: PLATFORM_NAME.to_string(),
        prompt: Regex::new(EXEC_PROMPT).expect("static JUNOS prompt pattern"),
        on_open_commands: vec![
            "set cli screen-length 0".to_string(),
            "set cli screen-width 511".to_string(),
            "set cli complete-on-space off".to_string(),
        ],
        failed_when_contains: [
            "unknown command",
            "syntax error",
            "error:",
            "missing argument",
            "invalid",
            "is ambiguous",
            "No valid completions",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        commands: FetchCommands {
            structured: "show configuration | display xml".to_string(),
            set_style: "show configuration | display set".to_string(),
            raw_cli: "show configuration".to_string(),
        },
        terminal_width: 511,
        terminal_height: 24,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::OutputKind;

    #[test]
    fn test_juniper_platform() {
        let platform = platform();
        assert_eq!(platform.name, "juniper_junos");
        assert_eq!(
            platform.commands.for_kind(OutputKind::SetStyle),
            "show configuration | display set"
        );
        assert_eq!(
            PlatformDefinition::by_name("juniper_junos").unwrap().name,
            PLATFORM_NAME
        );
        assert!(PlatformDefinition::by_name("cisco_ios").is_err());
    }

    #[test]
    fn test_exec_prompt_matches() {
        let platform = platform();
        assert!(platform.prompt.is_match(b"user@router> "));
        assert!(platform.prompt.is_match(b"root@PE0>"));
        assert!(platform.prompt.is_match(b"{master:0}\nadmin@mx480-re0>"));
        assert!(!platform.prompt.is_match(b"user@router# "));
        assert!(!platform.prompt.is_match(b"    <version>20.4R3</version>"));
    }

    #[test]
    fn test_normalize_strips_echo() {
        let platform = platform();
        let raw = "show configuration | display set\nset system host-name PE0\nset system root-authentication encrypted-password \"x\"\n\n";
        assert_eq!(
            platform.normalize_output(raw, "show configuration | display set"),
            "set system host-name PE0\nset system root-authentication encrypted-password \"x\"\n"
        );
    }

    #[test]
    fn test_detect_failure() {
        let platform = platform();
        let rejected = "                   ^\nsyntax error, expecting <command>.\n";
        assert!(platform.detect_failure(rejected).is_some());

        let config = "## Last commit: 2026-10-18 by root\nversion 20.4R3;\ninterfaces {\n    description \"invalid vlan\";\n}\n";
        assert!(platform.detect_failure(config).is_none());
        assert!(platform.detect_failure("").is_none());
    }
}
