//! Per-path policy overrides.
//!
//! Overrides come from an INI-flavoured file of `[section]`s, each carrying a
//! `pattern` regex plus optional policy keys. A path is matched once, when it
//! is first observed, against the rules in file order; the first match wins.
//! A built-in rule for the relay's own `server.hadrianus.` telemetry is
//! always consulted before any file rule, so user sections cannot shadow it.
//!
//! The `retentions` and `maxdrymessages` keys are validated and stored but
//! have reserved semantics; only `allowunmodified` changes behaviour today.

use std::path::Path;

use regex::Regex;
use thiserror::Error;

use crate::stats::INTERNAL_METRIC_PREFIX;

const SECONDS_IN_MINUTE: i64 = 60;
const SECONDS_IN_HOUR: i64 = SECONDS_IN_MINUTE * 60;
const SECONDS_IN_DAY: i64 = SECONDS_IN_HOUR * 24;
const SECONDS_IN_WEEK: i64 = SECONDS_IN_DAY * 7;
const SECONDS_IN_YEAR: i64 = SECONDS_IN_DAY * 365;

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("failed to open override file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid content on line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("key/value pair before any section on line {line}")]
    KeyOutsideSection { line: usize },
    #[error("missing key \"pattern\" in section {section:?}")]
    MissingPattern { section: String },
    #[error("invalid pattern in section {section:?}: {source}")]
    BadPattern {
        section: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid or missing value for {key:?} in section {section:?}")]
    BadValue { section: String, key: &'static str },
}

/// One `resolution:persistence` pair from a `retentions` value, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionItem {
    pub resolution: i64,
    pub persistence: i64,
}

/// One override rule. The `*_active` flags record whether the corresponding
/// key appeared in the section at all.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub pattern: Regex,
    pub retention: Vec<RetentionItem>,
    pub max_dry_messages: i64,
    pub allow_unmodified: bool,
    pub retention_active: bool,
    pub max_dry_messages_active: bool,
    pub allow_unmodified_active: bool,
}

/// The rule collection consulted when a new path is admitted.
pub struct OverrideSet {
    internal: OverrideRule,
    rules: Vec<OverrideRule>,
}

impl OverrideSet {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        let internal = OverrideRule {
            pattern: Regex::new(&format!("^{}", regex::escape(INTERNAL_METRIC_PREFIX)))
                .expect("internal pattern compiles"),
            retention: Vec::new(),
            max_dry_messages: 0,
            allow_unmodified: true,
            retention_active: false,
            max_dry_messages_active: false,
            allow_unmodified_active: true,
        };
        Self { internal, rules }
    }

    /// First matching rule, internal telemetry rule first, then file order.
    pub fn lookup(&self, path: &str) -> Option<&OverrideRule> {
        if self.internal.pattern.is_match(path) {
            return Some(&self.internal);
        }
        self.rules.iter().find(|rule| rule.pattern.is_match(path))
    }
}

// ---------------------------------------------------------------------------
// INI reading
// ---------------------------------------------------------------------------

struct IniSection {
    name: String,
    fields: Vec<(String, String)>,
}

/// Later occurrences of a key within a section win.
fn field<'a>(section: &'a IniSection, key: &str) -> Option<&'a str> {
    section
        .fields
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_ini(text: &str) -> Result<Vec<IniSection>, OverrideError> {
    let section_pattern =
        Regex::new(r"^\s*\[+\s*([^\]\n]+?)\s*\]+\s*(?:[;#].*)?$").expect("section pattern compiles");
    let key_pattern =
        Regex::new(r"^\s*(\S+)[^\S\n]*=[^\S\n]*([^;#\s](?:[^;#\n]|[;#])*)[^\S\n]*(?:[;#].*)?$")
            .expect("key pattern compiles");
    let irrelevant_pattern =
        Regex::new(r"^[^\S\n]*[#;].*|^\s*$").expect("irrelevant pattern compiles");

    let mut sections: Vec<IniSection> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(caps) = section_pattern.captures(line) {
            sections.push(IniSection {
                name: caps[1].to_string(),
                fields: Vec::new(),
            });
        } else if let Some(caps) = key_pattern.captures(line) {
            let section = sections
                .last_mut()
                .ok_or(OverrideError::KeyOutsideSection { line: index + 1 })?;
            section.fields.push((caps[1].to_string(), caps[2].to_string()));
        } else if !irrelevant_pattern.is_match(line) {
            return Err(OverrideError::MalformedLine {
                line: index + 1,
                text: line.to_string(),
            });
        }
    }
    Ok(sections)
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn seconds_for_suffix(suffix: &str) -> i64 {
    match suffix {
        "m" => SECONDS_IN_MINUTE,
        "h" => SECONDS_IN_HOUR,
        "d" => SECONDS_IN_DAY,
        "w" => SECONDS_IN_WEEK,
        "y" => SECONDS_IN_YEAR,
        // "" and "s" are plain seconds.
        _ => 1,
    }
}

fn parse_retentions(section: &str, value: &str) -> Result<Vec<RetentionItem>, OverrideError> {
    // Matched head pair plus the unparsed tail, consumed recursively.
    let pattern = Regex::new(
        r"^(\d+)([smhdwy]|):(\d+)([smhdwy]|)(?:,(\d+(?:[smhdwy]|):\d+(?:[smhdwy]|)(?:,\d+(?:[smhdwy]|):\d+(?:[smhdwy]|))*))?$",
    )
    .expect("retention pattern compiles");

    let bad = || OverrideError::BadValue {
        section: section.to_string(),
        key: "retentions",
    };

    let mut items = Vec::new();
    let mut rest = value.to_string();
    loop {
        let caps = pattern.captures(&rest).ok_or_else(bad)?;
        let resolution: i64 = caps[1].parse().map_err(|_| bad())?;
        let persistence: i64 = caps[3].parse().map_err(|_| bad())?;
        items.push(RetentionItem {
            resolution: resolution * seconds_for_suffix(&caps[2]),
            persistence: persistence * seconds_for_suffix(&caps[4]),
        });
        let tail = caps.get(5).map(|m| m.as_str().to_string());
        match tail {
            Some(tail) => rest = tail,
            None => break,
        }
    }
    Ok(items)
}

fn parse_ini_bool(section: &str, key: &'static str, value: &str) -> Result<bool, OverrideError> {
    let pattern =
        Regex::new(r"^(?:(1|on|true|yes)|(0|off|false|no|none))$").expect("bool pattern compiles");
    let caps = pattern
        .captures(value)
        .ok_or_else(|| OverrideError::BadValue {
            section: section.to_string(),
            key,
        })?;
    Ok(caps.get(1).is_some())
}

fn rule_from_section(section: &IniSection) -> Result<OverrideRule, OverrideError> {
    let pattern_text = field(section, "pattern").ok_or_else(|| OverrideError::MissingPattern {
        section: section.name.clone(),
    })?;
    let pattern = Regex::new(pattern_text).map_err(|source| OverrideError::BadPattern {
        section: section.name.clone(),
        source,
    })?;

    let mut rule = OverrideRule {
        pattern,
        retention: Vec::new(),
        max_dry_messages: 0,
        allow_unmodified: false,
        retention_active: false,
        max_dry_messages_active: false,
        allow_unmodified_active: false,
    };

    if let Some(value) = field(section, "retentions") {
        rule.retention = parse_retentions(&section.name, value)?;
        rule.retention_active = true;
    }

    if let Some(value) = field(section, "maxdrymessages") {
        let integer_pattern = Regex::new(r"^-?\d+$").expect("integer pattern compiles");
        if !integer_pattern.is_match(value) {
            return Err(OverrideError::BadValue {
                section: section.name.clone(),
                key: "maxdrymessages",
            });
        }
        rule.max_dry_messages = value.parse().map_err(|_| OverrideError::BadValue {
            section: section.name.clone(),
            key: "maxdrymessages",
        })?;
        rule.max_dry_messages_active = true;
    }

    if let Some(value) = field(section, "allowunmodified") {
        rule.allow_unmodified = parse_ini_bool(&section.name, "allowunmodified", value)?;
        rule.allow_unmodified_active = true;
    }

    Ok(rule)
}

/// Parse override rules from file text, preserving section order.
pub fn parse_rules(text: &str) -> Result<Vec<OverrideRule>, OverrideError> {
    parse_ini(text)?.iter().map(rule_from_section).collect()
}

pub fn load_override_file(path: &Path) -> Result<Vec<OverrideRule>, OverrideError> {
    let text = std::fs::read_to_string(path).map_err(|source| OverrideError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_rules(&text)
}
