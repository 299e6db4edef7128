//! # Error Classification Module
//!
//! Maps a failed operation onto one of six [`ErrorKind`]s using an ordered rule table.
//! The first matching rule wins; anything unmatched is a [`ErrorKind::PermanentError`].
//! Classification is pure: the same failure always yields the same kind.

use crate::engine::error::{Result, RetryLedgerError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::LazyLock;

#[cfg(unix)]
mod codes {
    pub const PERMISSION: &[i32] = &[1, 13]; // EPERM, EACCES
    pub const BUSY: &[i32] = &[16, 26]; // EBUSY, ETXTBSY
}

#[cfg(windows)]
mod codes {
    pub const PERMISSION: &[i32] = &[5]; // ERROR_ACCESS_DENIED
    pub const BUSY: &[i32] = &[32, 33]; // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
}

#[cfg(not(any(unix, windows)))]
mod codes {
    pub const PERMISSION: &[i32] = &[];
    pub const BUSY: &[i32] = &[];
}

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Access denied, usually an antivirus scan or sync client holding the file
    RecoverablePermission,
    /// The file is opened exclusively by another process
    FileLocked,
    /// A cloud sync client is rewriting the file
    SyncConflict,
    /// Network hiccup or timeout
    RecoverableTransient,
    /// The input format cannot be processed at all
    UnsupportedFormat,
    /// Anything else
    PermanentError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::RecoverablePermission,
        ErrorKind::FileLocked,
        ErrorKind::SyncConflict,
        ErrorKind::RecoverableTransient,
        ErrorKind::UnsupportedFormat,
        ErrorKind::PermanentError,
    ];

    pub fn is_recoverable(self) -> bool {
        match self {
            ErrorKind::RecoverablePermission
            | ErrorKind::FileLocked
            | ErrorKind::SyncConflict
            | ErrorKind::RecoverableTransient => true,
            ErrorKind::UnsupportedFormat | ErrorKind::PermanentError => false,
        }
    }

    /// Every recoverable kind is worth retrying; permanent kinds never are
    pub fn retry_recommended(self) -> bool {
        self.is_recoverable()
    }

    /// Fixed user-facing message for this kind
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::RecoverablePermission => "temporarily locked (antivirus/sync), retrying...",
            ErrorKind::FileLocked => "file is in use by another process, retrying...",
            ErrorKind::SyncConflict => "cloud sync conflict detected, retrying...",
            ErrorKind::RecoverableTransient => "network or timeout issue, retrying...",
            ErrorKind::UnsupportedFormat => "unsupported file format, skipping",
            ErrorKind::PermanentError => "could not be processed",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::RecoverablePermission => "RECOVERABLE_PERMISSION",
            ErrorKind::FileLocked => "FILE_LOCKED",
            ErrorKind::SyncConflict => "SYNC_CONFLICT",
            ErrorKind::RecoverableTransient => "RECOVERABLE_TRANSIENT",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::PermanentError => "PERMANENT_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of classifying one failure. Created once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub is_recoverable: bool,
    pub retry_recommended: bool,
    pub user_message: String,
    /// Text of the original failure
    pub detail: String,
}

impl ErrorClassification {
    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            is_recoverable: kind.is_recoverable(),
            retry_recommended: kind.retry_recommended(),
            user_message: kind.user_message().to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_message, self.detail)
    }
}

/// A failure returned by a caller-supplied operation
///
/// Anything convertible into this type can be returned from an operation: plain strings,
/// `std::io::Error` (keeping its OS code and kind), or boxed errors. An operation that
/// already knows what went wrong can tag the failure with [`OperationError::classified`],
/// which bypasses the rule table entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    message: String,
    os_code: Option<i32>,
    io_kind: Option<io::ErrorKind>,
    kind: Option<ErrorKind>,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            os_code: None,
            io_kind: None,
            kind: None,
        }
    }

    /// A failure whose kind is already known
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(message)
        }
    }

    pub fn with_os_code(mut self, code: i32) -> Self {
        self.os_code = Some(code);
        self
    }

    pub fn with_io_kind(mut self, kind: io::ErrorKind) -> Self {
        self.io_kind = Some(kind);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn os_code(&self) -> Option<i32> {
        self.os_code
    }

    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.io_kind
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationError {}

impl From<io::Error> for OperationError {
    fn from(err: io::Error) -> Self {
        Self::from(&err)
    }
}

impl From<&io::Error> for OperationError {
    fn from(err: &io::Error) -> Self {
        Self {
            message: err.to_string(),
            os_code: err.raw_os_error(),
            io_kind: Some(err.kind()),
            kind: None,
        }
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for OperationError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<io::Error>() {
            Ok(io_err) => Self::from(*io_err),
            Err(other) => match other.downcast::<OperationError>() {
                Ok(op_err) => *op_err,
                Err(other) => Self::new(other.to_string()),
            },
        }
    }
}

/// One entry of the classification table
///
/// A rule matches when any of its OS codes, I/O kinds or its message pattern matches.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    name: String,
    kind: ErrorKind,
    os_codes: Vec<i32>,
    io_kinds: Vec<io::ErrorKind>,
    pattern: Option<Regex>,
}

impl ClassificationRule {
    pub fn new(name: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            os_codes: Vec::new(),
            io_kinds: Vec::new(),
            pattern: None,
        }
    }

    pub fn os_codes(mut self, codes: &[i32]) -> Self {
        self.os_codes.extend_from_slice(codes);
        self
    }

    pub fn io_kinds(mut self, kinds: &[io::ErrorKind]) -> Self {
        self.io_kinds.extend_from_slice(kinds);
        self
    }

    /// Match the failure message against a regular expression
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            RetryLedgerError::InvalidConfig(format!("invalid pattern for rule {}: {e}", self.name))
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn matches(&self, err: &OperationError) -> bool {
        if let Some(code) = err.os_code {
            if self.os_codes.contains(&code) {
                return true;
            }
        }
        if let Some(kind) = err.io_kind {
            if self.io_kinds.contains(&kind) {
                return true;
            }
        }
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&err.message))
    }
}

fn builtin(name: &str, kind: ErrorKind, pattern: &str) -> ClassificationRule {
    let mut rule = ClassificationRule::new(name, kind);
    rule.pattern = Some(Regex::new(pattern).expect("built-in classification pattern"));
    rule
}

static STANDARD_RULES: LazyLock<Vec<ClassificationRule>> = LazyLock::new(|| {
    vec![
        builtin(
            "permission",
            ErrorKind::RecoverablePermission,
            r"(?i)permission denied",
        )
        .os_codes(codes::PERMISSION)
        .io_kinds(&[io::ErrorKind::PermissionDenied]),
        builtin(
            "locked",
            ErrorKind::FileLocked,
            r"(?i)being used by another process|file is locked",
        )
        .os_codes(codes::BUSY)
        .io_kinds(&[io::ErrorKind::ResourceBusy, io::ErrorKind::ExecutableFileBusy]),
        builtin(
            "sync",
            ErrorKind::SyncConflict,
            r"(?i)sync conflict|onedrive|dropbox.*sync",
        ),
        builtin(
            "transient",
            ErrorKind::RecoverableTransient,
            r"(?i)timeout|network|connection",
        )
        .io_kinds(&[
            io::ErrorKind::TimedOut,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::NetworkUnreachable,
            io::ErrorKind::HostUnreachable,
            io::ErrorKind::NetworkDown,
        ]),
        builtin(
            "unsupported_format",
            ErrorKind::UnsupportedFormat,
            r"(?i)unsupported (file )?format",
        ),
    ]
});

static DEFAULT_CLASSIFIER: LazyLock<ErrorClassifier> = LazyLock::new(ErrorClassifier::standard);

/// Ordered rule table mapping failures to [`ErrorClassification`]s
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl ErrorClassifier {
    /// The built-in rules: permission, locked, sync, transient, unsupported format
    pub fn standard() -> Self {
        Self {
            rules: STANDARD_RULES.clone(),
        }
    }

    /// Append a rule after the existing ones, still ahead of the permanent fallback
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule ahead of every existing rule
    pub fn with_priority_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, err: &OperationError) -> ErrorClassification {
        if let Some(kind) = err.kind {
            return ErrorClassification::from_kind(kind, err.message.clone());
        }

        let kind = self
            .rules
            .iter()
            .find(|rule| rule.matches(err))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::PermanentError);

        ErrorClassification::from_kind(kind, err.message.clone())
    }
}

/// Classify with the standard rule table
pub fn classify(err: &OperationError) -> ErrorClassification {
    DEFAULT_CLASSIFIER.classify(err)
}
