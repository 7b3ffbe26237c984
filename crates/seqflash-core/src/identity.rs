//! Identity extraction from device console output
//!
//! Devices print their identifier and public key as free-form log lines
//! during boot. Extraction is driven by a [`RuleSet`]: for each field an
//! ordered list of labelled patterns, most specific first. Every pattern has
//! exactly one capture group holding the value.
//!
//! [`IdentityScanner`] consumes lines one at a time, so the serial reader can
//! stop as soon as both fields are known.

use chrono::{DateTime, Local};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::{IdentitySettings, PatternSpec};
use crate::error::{Error, Result};

/// Built-in device identifier patterns as `(label, pattern)`
pub const DEFAULT_DEVICE_ID_PATTERNS: &[(&str, &str)] = &[
    ("serial number", r"serial number:\s*(zap-[A-Fa-f0-9]+)"),
    ("device id", r"device id:\s*(zap-[A-Fa-f0-9]+)"),
    ("serial", r"serial:\s*(zap-[A-Fa-f0-9]+)"),
];

/// Built-in public key patterns as `(label, pattern)`
pub const DEFAULT_PUBLIC_KEY_PATTERNS: &[(&str, &str)] = &[
    ("public key", r"public key:\s*([A-Fa-f0-9]{32,})"),
    ("pubkey", r"pubkey:\s*([A-Fa-f0-9]{32,})"),
    ("key", r"key:\s*([A-Fa-f0-9]{32,})"),
];

/// Substrings that mark a healthy boot
pub const DEFAULT_BOOT_MARKERS: &[&str] = &["app_main", "hello world", "setup()", "ready"];

/// Substrings that mark a boot failure
pub const DEFAULT_FAULT_MARKERS: &[&str] = &["invalid header"];

/// A labelled, compiled extraction pattern
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    label: String,
    pattern: Regex,
}

impl ExtractionRule {
    /// Compile a case-insensitive rule; the pattern must have one capture group
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        // captures_len includes the implicit whole-match group
        if regex.captures_len() != 2 {
            return Err(Error::PatternCaptureCount(pattern.to_string()));
        }
        Ok(Self {
            label: label.into(),
            pattern: regex,
        })
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Return the captured value if this rule matches the line
    pub fn capture<'l>(&self, line: &'l str) -> Option<&'l str> {
        self.pattern
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

/// Ordered extraction rules plus boot-health markers
#[derive(Debug, Clone)]
pub struct RuleSet {
    device_id: Vec<ExtractionRule>,
    public_key: Vec<ExtractionRule>,
    boot_markers: Vec<String>,
    fault_markers: Vec<String>,
}

fn compile(specs: &[PatternSpec], defaults: &[(&str, &str)]) -> Result<Vec<ExtractionRule>> {
    if specs.is_empty() {
        defaults
            .iter()
            .map(|(label, pattern)| ExtractionRule::new(*label, pattern))
            .collect()
    } else {
        specs
            .iter()
            .map(|s| ExtractionRule::new(s.label.clone(), &s.pattern))
            .collect()
    }
}

fn markers(configured: &[String], defaults: &[&str]) -> Vec<String> {
    let source: Vec<String> = if configured.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        configured.to_vec()
    };
    source.into_iter().map(|m| m.to_lowercase()).collect()
}

impl RuleSet {
    /// Build a rule set from configuration, falling back to built-ins per field
    pub fn from_settings(settings: &IdentitySettings) -> Result<Self> {
        Ok(Self {
            device_id: compile(&settings.device_id, DEFAULT_DEVICE_ID_PATTERNS)?,
            public_key: compile(&settings.public_key, DEFAULT_PUBLIC_KEY_PATTERNS)?,
            boot_markers: markers(&settings.boot_markers, DEFAULT_BOOT_MARKERS),
            fault_markers: markers(&settings.fault_markers, DEFAULT_FAULT_MARKERS),
        })
    }

    /// Device identifier rules in priority order
    pub fn device_id_rules(&self) -> &[ExtractionRule] {
        &self.device_id
    }

    /// Public key rules in priority order
    pub fn public_key_rules(&self) -> &[ExtractionRule] {
        &self.public_key
    }

    fn first_match<'a, 'l>(
        rules: &'a [ExtractionRule],
        line: &'l str,
    ) -> Option<(&'a ExtractionRule, &'l str)> {
        rules
            .iter()
            .find_map(|rule| rule.capture(line).map(|value| (rule, value)))
    }

    fn contains_any(markers: &[String], line: &str) -> bool {
        let lower = line.to_lowercase();
        markers.iter().any(|m| lower.contains(m.as_str()))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        // The built-in patterns are known to compile
        Self {
            device_id: DEFAULT_DEVICE_ID_PATTERNS
                .iter()
                .filter_map(|(l, p)| ExtractionRule::new(*l, p).ok())
                .collect(),
            public_key: DEFAULT_PUBLIC_KEY_PATTERNS
                .iter()
                .filter_map(|(l, p)| ExtractionRule::new(*l, p).ok())
                .collect(),
            boot_markers: markers(&[], DEFAULT_BOOT_MARKERS),
            fault_markers: markers(&[], DEFAULT_FAULT_MARKERS),
        }
    }
}

/// What feeding one line produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineFindings {
    /// Device identifier found on this line
    pub device_id: Option<String>,
    /// Public key found on this line
    pub public_key: Option<String>,
    /// The line contained a boot fault marker
    pub boot_fault: bool,
}

/// Everything harvested from one identity read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityResult {
    /// Port the device was read on
    pub port: String,
    /// Extracted device identifier
    pub device_id: Option<String>,
    /// Extracted public key token
    pub public_key: Option<String>,
    /// Every non-empty line received, in order
    pub output_lines: Vec<String>,
    /// A healthy-boot marker was seen
    pub boot_success: bool,
    /// A boot fault marker was seen
    pub boot_fault: bool,
    /// When the read finished
    pub timestamp: DateTime<Local>,
}

impl IdentityResult {
    /// Both identity fields were extracted
    pub fn is_complete(&self) -> bool {
        self.device_id.is_some() && self.public_key.is_some()
    }

    /// Fault marker seen without any healthy-boot marker
    pub fn boot_suspect(&self) -> bool {
        self.boot_fault && !self.boot_success
    }
}

/// Incremental scanner over console lines
#[derive(Debug)]
pub struct IdentityScanner<'r> {
    rules: &'r RuleSet,
    device_id: Option<String>,
    public_key: Option<String>,
    boot_success: bool,
    boot_fault: bool,
    lines: Vec<String>,
}

impl<'r> IdentityScanner<'r> {
    /// Start a scan with the given rules
    pub fn new(rules: &'r RuleSet) -> Self {
        Self {
            rules,
            device_id: None,
            public_key: None,
            boot_success: false,
            boot_fault: false,
            lines: Vec::new(),
        }
    }

    /// Feed one line; empty lines are ignored
    pub fn feed(&mut self, line: &str) -> LineFindings {
        let mut findings = LineFindings::default();
        if line.is_empty() {
            return findings;
        }
        self.lines.push(line.to_string());

        if RuleSet::contains_any(&self.rules.boot_markers, line) {
            self.boot_success = true;
        }
        if RuleSet::contains_any(&self.rules.fault_markers, line) {
            self.boot_fault = true;
            findings.boot_fault = true;
        }

        if self.device_id.is_none() {
            if let Some((rule, value)) = RuleSet::first_match(&self.rules.device_id, line) {
                log::debug!("device id matched rule '{}'", rule.label());
                self.device_id = Some(value.to_string());
                findings.device_id = Some(value.to_string());
            }
        }

        if self.public_key.is_none() {
            if let Some((rule, value)) = RuleSet::first_match(&self.rules.public_key, line) {
                log::debug!("public key matched rule '{}'", rule.label());
                self.public_key = Some(value.to_string());
                findings.public_key = Some(value.to_string());
            }
        }

        findings
    }

    /// Both fields have been found
    pub fn is_complete(&self) -> bool {
        self.device_id.is_some() && self.public_key.is_some()
    }

    /// Device identifier found so far
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Public key found so far
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// Close the scan and produce the result bundle
    pub fn finish(self, port: &str) -> IdentityResult {
        IdentityResult {
            port: port.to_string(),
            device_id: self.device_id,
            public_key: self.public_key,
            output_lines: self.lines,
            boot_success: self.boot_success,
            boot_fault: self.boot_fault,
            timestamp: Local::now(),
        }
    }
}

/// Scan a captured buffer, stopping once both fields are found
///
/// Returns `(device_id, public_key)`. Rescanning the same buffer always
/// yields the same pair.
pub fn scan_lines<S: AsRef<str>>(
    rules: &RuleSet,
    lines: impl IntoIterator<Item = S>,
) -> (Option<String>, Option<String>) {
    let mut scanner = IdentityScanner::new(rules);
    for line in lines {
        scanner.feed(line.as_ref());
        if scanner.is_complete() {
            break;
        }
    }
    (scanner.device_id, scanner.public_key)
}

/// Shorten a long key for display as `first16...last8`
pub fn abbreviate_key(key: &str) -> String {
    if key.len() > 24 && key.is_ascii() {
        format!("{}...{}", &key[..16], &key[key.len() - 8..])
    } else {
        key.to_string()
    }
}
