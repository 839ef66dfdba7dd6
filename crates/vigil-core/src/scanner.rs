//! Bounded, rule-based style scanning.
//!
//! Each [`StyleRule`] is a pure predicate over file text. A [`RuleSet`] is
//! the compiled, enabled subset of rules for the current configuration, and
//! [`StyleScanner::scan`] applies it to one file. Scanning is a single pass
//! over the lines of the file; the rules are independent, so the reported
//! order is fixed by sorting (line, then rule id, then column) rather than
//! by the order rules were evaluated.
//!
//! `directory_structure` is the one rule that looks at a repository rather
//! than a file; [`RuleSet::check_layout`] applies it to a repository root.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use vigil_types::{FailureKind, FileViolations, ScanResult, Violation};

use crate::clock::{TimeSource, elapsed_millis};
use crate::config::{ConfigError, EngineConfig};

/// Characters of context kept on either side of a banned term.
const CONTEXT_CHARS: usize = 20;

/// Extensions whose file names are held to `file_naming`.
const NAMED_FILE_EXTENSIONS: [&str; 2] = ["py", "rs"];

/// Errors that can occur while scanning a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The file could not be read.
    #[error("cannot read {path}: {reason}")]
    Unreadable {
        /// The file that failed.
        path: String,
        /// The underlying I/O error message.
        reason: String,
    },

    /// The file exceeds the configured size ceiling.
    #[error("{path} is {size} bytes, over the {limit} byte scan limit")]
    TooLarge {
        /// The oversized file.
        path: String,
        /// Its size in bytes.
        size: u64,
        /// The configured ceiling.
        limit: u64,
    },
}

impl ScanError {
    /// Category recorded in scan-failure events.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Unreadable { .. } => FailureKind::Unreadable,
            Self::TooLarge { .. } => FailureKind::TooLarge,
        }
    }
}

/// The fixed catalogue of style rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StyleRule {
    /// Lines longer than the configured limit.
    MaxLineLength,
    /// Spaces or tabs at the end of a line.
    TrailingWhitespace,
    /// Tabs in leading indentation.
    TabIndentation,
    /// Configured terms, matched case-insensitively as whole words.
    BannedTerm,
    /// `class` names that are not `CamelCase`.
    ClassNaming,
    /// `def` and `fn` names that are not `snake_case`.
    FunctionNaming,
    /// Source file stems that are not `snake_case`.
    FileNaming,
    /// Expected directories missing from a repository root.
    DirectoryStructure,
}

impl StyleRule {
    /// Every rule, in id order.
    pub const ALL: [Self; 8] = [
        Self::BannedTerm,
        Self::ClassNaming,
        Self::DirectoryStructure,
        Self::FileNaming,
        Self::FunctionNaming,
        Self::MaxLineLength,
        Self::TabIndentation,
        Self::TrailingWhitespace,
    ];

    /// The id used in configuration and in [`Violation::rule_id`].
    pub const fn id(self) -> &'static str {
        match self {
            Self::MaxLineLength => "max_line_length",
            Self::TrailingWhitespace => "trailing_whitespace",
            Self::TabIndentation => "tab_indentation",
            Self::BannedTerm => "banned_term",
            Self::ClassNaming => "class_naming",
            Self::FunctionNaming => "function_naming",
            Self::FileNaming => "file_naming",
            Self::DirectoryStructure => "directory_structure",
        }
    }

    /// Look a rule up by id.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rule| rule.id() == id)
    }
}

/// The compiled, enabled subset of rules plus their parameters.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<StyleRule>,
    max_line_length: usize,
    banned: Vec<(String, Regex)>,
    class_decl: Regex,
    function_decl: Regex,
    expected_dirs: BTreeMap<String, Vec<String>>,
}

impl RuleSet {
    /// Compile the rules enabled by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown rule ids or a
    /// banned term that cannot be compiled into a matcher.
    pub fn compile(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.style_rules.len());
        for id in &config.style_rules {
            let rule = StyleRule::from_id(id).ok_or_else(|| ConfigError::InvalidValue {
                key: "style_rules".to_owned(),
                reason: format!("unknown rule id: {id}"),
            })?;
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        rules.sort_unstable();

        let banned = config
            .banned_terms
            .iter()
            .map(|term| {
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term.trim())))
                    .case_insensitive(true)
                    .build()
                    .map(|re| (term.trim().to_owned(), re))
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "banned_terms".to_owned(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let class_decl = declaration_regex(r"\bclass\s+([A-Za-z_][A-Za-z0-9_]*)")?;
        let function_decl = declaration_regex(r"\b(?:def|fn)\s+([A-Za-z_][A-Za-z0-9_]*)")?;

        Ok(Self {
            rules,
            max_line_length: config.max_line_length,
            banned,
            class_decl,
            function_decl,
            expected_dirs: config.expected_dirs.clone(),
        })
    }

    /// Number of enabled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is enabled.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `rule` is enabled.
    pub fn contains(&self, rule: StyleRule) -> bool {
        self.rules.contains(&rule)
    }

    /// Apply every enabled rule to `text`, whose file name is `file_name`.
    ///
    /// Returns violations sorted by line, then rule id, then column.
    pub fn check(&self, file_name: &str, text: &str) -> Vec<Violation> {
        let mut violations = Vec::new();

        if self.contains(StyleRule::FileNaming) {
            check_file_name(file_name, &mut violations);
        }

        for (index, line) in text.lines().enumerate() {
            let line_no = index.saturating_add(1);
            for rule in &self.rules {
                match rule {
                    StyleRule::MaxLineLength => {
                        let len = line.chars().count();
                        if len > self.max_line_length {
                            violations.push(violation(
                                line_no,
                                self.max_line_length.saturating_add(1),
                                *rule,
                                format!("line is {len} characters, limit is {}", self.max_line_length),
                            ));
                        }
                    }
                    StyleRule::TrailingWhitespace => {
                        let trimmed = line.trim_end_matches([' ', '\t']);
                        if trimmed.len() < line.len() {
                            violations.push(violation(
                                line_no,
                                trimmed.chars().count().saturating_add(1),
                                *rule,
                                "trailing whitespace".to_owned(),
                            ));
                        }
                    }
                    StyleRule::TabIndentation => {
                        let indent = line
                            .char_indices()
                            .take_while(|(_, c)| *c == ' ' || *c == '\t')
                            .find(|(_, c)| *c == '\t');
                        if let Some((byte, _)) = indent {
                            violations.push(violation(
                                line_no,
                                column_of(line, byte),
                                *rule,
                                "tab used for indentation".to_owned(),
                            ));
                        }
                    }
                    StyleRule::BannedTerm => {
                        for (term, re) in &self.banned {
                            for found in re.find_iter(line) {
                                violations.push(violation(
                                    line_no,
                                    column_of(line, found.start()),
                                    *rule,
                                    format!(
                                        "banned term \"{term}\": ...{}...",
                                        context_around(line, found.start(), found.end())
                                    ),
                                ));
                            }
                        }
                    }
                    StyleRule::ClassNaming => {
                        for caps in self.class_decl.captures_iter(line) {
                            if let Some(name) = caps.get(1) {
                                if !is_camel_case(name.as_str()) {
                                    violations.push(violation(
                                        line_no,
                                        column_of(line, name.start()),
                                        *rule,
                                        format!("class name `{}` is not CamelCase", name.as_str()),
                                    ));
                                }
                            }
                        }
                    }
                    StyleRule::FunctionNaming => {
                        for caps in self.function_decl.captures_iter(line) {
                            if let Some(name) = caps.get(1) {
                                if !is_snake_case(name.as_str()) {
                                    violations.push(violation(
                                        line_no,
                                        column_of(line, name.start()),
                                        *rule,
                                        format!(
                                            "function name `{}` is not snake_case",
                                            name.as_str()
                                        ),
                                    ));
                                }
                            }
                        }
                    }
                    // Reported once per file above, or per repository.
                    StyleRule::FileNaming | StyleRule::DirectoryStructure => {}
                }
            }
        }

        violations.sort_by(|a, b| {
            a.line
                .cmp(&b.line)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
                .then_with(|| a.column.cmp(&b.column))
        });
        violations
    }

    /// Check `root` against the expected directory layout.
    ///
    /// A missing parent is reported once, without its children. Each entry
    /// is keyed by the missing directory relative to `root` and holds a
    /// single violation at line 1 column 1.
    pub fn check_layout(&self, root: &Path) -> Vec<FileViolations> {
        if !self.contains(StyleRule::DirectoryStructure) {
            return Vec::new();
        }

        let mut missing = Vec::new();
        for (parent, children) in &self.expected_dirs {
            if !root.join(parent).is_dir() {
                missing.push(layout_violation(
                    parent.clone(),
                    format!("missing expected directory `{parent}`"),
                ));
                continue;
            }
            for child in children {
                let rel = format!("{parent}/{child}");
                if !root.join(&rel).is_dir() {
                    let message = format!("missing expected subdirectory `{rel}`");
                    missing.push(layout_violation(rel, message));
                }
            }
        }
        missing
    }
}

fn layout_violation(path: String, message: String) -> FileViolations {
    FileViolations {
        path,
        violations: vec![violation(1, 1, StyleRule::DirectoryStructure, message)],
    }
}

/// Applies a [`RuleSet`] to files on disk.
#[derive(Debug, Clone)]
pub struct StyleScanner {
    clock: Arc<dyn TimeSource>,
}

impl StyleScanner {
    /// Create a scanner that times scans with `clock`.
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self { clock }
    }

    /// Scan one file.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::TooLarge`] when the file exceeds
    /// `max_file_bytes`, or [`ScanError::Unreadable`] when its metadata or
    /// contents cannot be read. Invalid UTF-8 is replaced, not rejected.
    pub fn scan(
        &self,
        path: &Path,
        rules: &RuleSet,
        max_file_bytes: u64,
    ) -> Result<ScanResult, ScanError> {
        let started = self.clock.now();
        let display = path.display().to_string();

        let unreadable = |e: std::io::Error| ScanError::Unreadable {
            path: display.clone(),
            reason: e.to_string(),
        };

        let meta = std::fs::metadata(path).map_err(unreadable)?;
        if !meta.is_file() {
            return Err(ScanError::Unreadable {
                path: display,
                reason: "not a regular file".to_owned(),
            });
        }
        if meta.len() > max_file_bytes {
            return Err(ScanError::TooLarge {
                path: display,
                size: meta.len(),
                limit: max_file_bytes,
            });
        }

        let bytes = std::fs::read(path).map_err(unreadable)?;
        let text = String::from_utf8_lossy(&bytes);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let violations = rules.check(&file_name, &text);

        Ok(ScanResult {
            path: display,
            violations,
            rule_count: rules.len(),
            elapsed_ms: elapsed_millis(started, self.clock.now()),
        })
    }
}

fn declaration_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
        key: "style_rules".to_owned(),
        reason: e.to_string(),
    })
}

fn violation(line: usize, column: usize, rule: StyleRule, message: String) -> Violation {
    Violation {
        line,
        column,
        rule_id: rule.id().to_owned(),
        message,
    }
}

fn check_file_name(file_name: &str, out: &mut Vec<Violation>) {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return;
    };
    if NAMED_FILE_EXTENSIONS.contains(&ext) && !is_snake_case(stem) {
        out.push(violation(
            1,
            1,
            StyleRule::FileNaming,
            format!("file name `{file_name}` is not snake_case"),
        ));
    }
}

/// 1-based character column of a byte offset within `line`.
fn column_of(line: &str, byte: usize) -> usize {
    line.get(..byte)
        .map_or(0, |prefix| prefix.chars().count())
        .saturating_add(1)
}

fn context_around(line: &str, start: usize, end: usize) -> String {
    let before: String = line
        .get(..start)
        .unwrap_or_default()
        .chars()
        .rev()
        .take(CONTEXT_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let matched = line.get(start..end).unwrap_or_default();
    let after: String = line
        .get(end..)
        .unwrap_or_default()
        .chars()
        .take(CONTEXT_CHARS)
        .collect();
    format!("{before}{matched}{after}")
}

fn is_camel_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_snake_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
