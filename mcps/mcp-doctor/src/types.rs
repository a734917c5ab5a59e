//! Core data model for the repair engine
//!
//! Errors arrive already classified. Fixes and plans are rebuilt for every
//! repair cycle and never persisted.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Error Model
// ============================================================================

/// Closed taxonomy of detected problems.
///
/// Adding a variant requires adding its strategy and executor arm together;
/// both dispatch sites match exhaustively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum ErrorKind {
    PathError,
    PermissionError,
    ConfigError,
    NetworkError,
    EnvironmentError,
    UnknownError,
}

impl ErrorKind {
    /// Stable slug used in fix ids
    pub fn slug(self) -> &'static str {
        match self {
            ErrorKind::PathError => "path",
            ErrorKind::PermissionError => "permission",
            ErrorKind::ConfigError => "config",
            ErrorKind::NetworkError => "network",
            ErrorKind::EnvironmentError => "environment",
            ErrorKind::UnknownError => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One detected problem, as produced by the external classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorRecord {
    kind: ErrorKind,
    message: String,
    /// Name of the owning server registration; absent for client-wide errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    /// Classifier's opinion, advisory only
    #[serde(default)]
    fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            server: None,
            fixable: false,
            details: None,
        }
    }

    pub fn for_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_fixable(mut self, fixable: bool) -> Self {
        self.fixable = fixable;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn fixable(&self) -> bool {
        self.fixable
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

// ============================================================================
// Server Registrations
// ============================================================================

/// MCP client application owning a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    ClaudeDesktop,
    Cursor,
    Windsurf,
    VsCode,
}

impl ClientType {
    /// Top-level key holding the server map in this client's config file
    pub fn root_key(self) -> &'static str {
        match self {
            ClientType::VsCode => "servers",
            _ => "mcpServers",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::ClaudeDesktop => "claude_desktop",
            ClientType::Cursor => "cursor",
            ClientType::Windsurf => "windsurf",
            ClientType::VsCode => "vs_code",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client config file the engine may repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClientTarget {
    pub client: ClientType,
    pub config_path: PathBuf,
}

/// A server registration read from a client config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct McpServer {
    pub name: String,
    pub client: ClientType,
    pub config_path: PathBuf,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

impl McpServer {
    pub fn target(&self) -> ClientTarget {
        ClientTarget {
            client: self.client,
            config_path: self.config_path.clone(),
        }
    }
}

/// Caller-owned set of known servers. The engine only looks servers up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerRegistry {
    servers: Vec<McpServer>,
}

impl ServerRegistry {
    pub fn new(servers: Vec<McpServer>) -> Self {
        Self { servers }
    }

    /// Lookup is by name; with duplicates the first registration wins
    pub fn get(&self, name: &str) -> Option<&McpServer> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Names registered more than once, e.g. in two client files
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut duplicates: Vec<&str> = Vec::new();
        for (i, server) in self.servers.iter().enumerate() {
            let name = server.name.as_str();
            if !duplicates.contains(&name) && self.servers[..i].iter().any(|s| s.name == name) {
                duplicates.push(name);
            }
        }
        duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = &McpServer> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

// ============================================================================
// Changes and Fixes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ChangeKind {
    Command,
    EnvironmentVariable,
    Permission,
    ConfigField,
    Package,
}

/// One concrete mutation proposed by a fix.
///
/// `before`/`after` are opaque to the engine; only the config manager
/// interprets them. Both may be null for non-substitutive actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Change {
    pub kind: ChangeKind,
    pub description: String,
    pub server: String,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
}

impl Change {
    pub fn command(server: &str, before: &str, after: &str) -> Self {
        Self {
            kind: ChangeKind::Command,
            description: format!("Replace command '{}' with '{}'", before, after),
            server: server.to_string(),
            before: Some(Value::String(before.to_string())),
            after: Some(Value::String(after.to_string())),
        }
    }

    pub fn package(server: &str, package: &str, manager: &str) -> Self {
        Self {
            kind: ChangeKind::Package,
            description: format!("Install package '{}' with {}", package, manager),
            server: server.to_string(),
            before: None,
            after: Some(serde_json::json!({ "package": package, "manager": manager })),
        }
    }

    pub fn permission(server: &str, description: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Permission,
            description: description.into(),
            server: server.to_string(),
            before: None,
            after: None,
        }
    }

    pub fn config_syntax(server: &str, config_path: &std::path::Path) -> Self {
        Self {
            kind: ChangeKind::ConfigField,
            description: format!("Repair JSON syntax in {}", config_path.display()),
            server: server.to_string(),
            before: Some(Value::String(config_path.display().to_string())),
            after: None,
        }
    }
}

/// Deterministic fix identifier (`<server>:<kind>` or `<server>:advisor:<n>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FixId(String);

impl FixId {
    pub fn rule(server: &str, kind: ErrorKind) -> Self {
        Self(format!("{}:{}", server, kind.slug()))
    }

    pub fn advisor(scope: &str, index: usize) -> Self {
        Self(format!("{}:advisor:{}", scope, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FixId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FixId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for FixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a fix came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    Rule,
    Advisor,
}

/// A proposed remediation for one error group.
///
/// Only the constructors set `automatic_fix`, so the policy rules
/// (permission and advisor fixes are manual) cannot be bypassed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fix {
    id: FixId,
    error: ErrorRecord,
    description: String,
    changes: Vec<Change>,
    automatic_fix: bool,
    source: FixSource,
}

impl Fix {
    /// Rule fix that may be applied unattended. Permission-class errors are
    /// downgraded to manual regardless.
    pub fn automatic(
        id: FixId,
        error: ErrorRecord,
        description: impl Into<String>,
        changes: Vec<Change>,
    ) -> Self {
        let automatic_fix = error.kind() != ErrorKind::PermissionError
            && !changes.iter().any(|c| c.kind == ChangeKind::Permission);
        Self {
            id,
            error,
            description: description.into(),
            changes,
            automatic_fix,
            source: FixSource::Rule,
        }
    }

    /// Rule fix that requires explicit user confirmation
    pub fn manual(
        id: FixId,
        error: ErrorRecord,
        description: impl Into<String>,
        changes: Vec<Change>,
    ) -> Self {
        Self {
            id,
            error,
            description: description.into(),
            changes,
            automatic_fix: false,
            source: FixSource::Rule,
        }
    }

    /// Advisor suggestion; always manual
    pub fn advised(
        id: FixId,
        error: ErrorRecord,
        description: impl Into<String>,
        changes: Vec<Change>,
    ) -> Self {
        Self {
            source: FixSource::Advisor,
            ..Self::manual(id, error, description, changes)
        }
    }

    pub fn id(&self) -> &FixId {
        &self.id
    }

    pub fn error(&self) -> &ErrorRecord {
        &self.error
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic_fix
    }

    pub fn source(&self) -> FixSource {
        self.source
    }

    pub fn find_change(&self, kind: ChangeKind) -> Option<&Change> {
        self.changes.iter().find(|c| c.kind == kind)
    }

    /// Whether this fix needs a human before it runs
    pub fn needs_confirmation(&self) -> bool {
        !self.automatic_fix
            || self.error.kind() == ErrorKind::PermissionError
            || self
                .changes
                .iter()
                .any(|c| matches!(c.kind, ChangeKind::Permission | ChangeKind::Command))
    }
}

// ============================================================================
// Repair Plan
// ============================================================================

/// The unit of work for one repair cycle
#[derive(Debug, Clone, Serialize)]
pub struct RepairPlan {
    pub id: String,
    /// Full input list, kept as an audit trail
    pub errors: Vec<ErrorRecord>,
    pub fixes: Vec<Fix>,
    pub requires_confirmation: bool,
}

impl RepairPlan {
    pub fn new(errors: Vec<ErrorRecord>, fixes: Vec<Fix>) -> Self {
        let requires_confirmation = fixes.iter().any(Fix::needs_confirmation);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            errors,
            fixes,
            requires_confirmation,
        }
    }

    pub fn find_fix(&self, id: &FixId) -> Option<&Fix> {
        self.fixes.iter().find(|f| f.id() == id)
    }

    /// Errors no fix in the plan addresses
    pub fn unaddressed_errors(&self) -> Vec<&ErrorRecord> {
        self.errors
            .iter()
            .filter(|e| {
                !self.fixes.iter().any(|f| {
                    f.error().kind() == e.kind()
                        && e.server().is_some()
                        && f.error().server() == e.server()
                })
            })
            .collect()
    }

    /// Append manual fixes (advisor output). Confirmation stays required.
    pub fn merge_fixes(&mut self, fixes: impl IntoIterator<Item = Fix>) {
        for fix in fixes {
            self.requires_confirmation |= fix.needs_confirmation();
            self.fixes.push(fix);
        }
    }
}

// ============================================================================
// Fix Results
// ============================================================================

/// Why a fix could not be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FixFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether this specific outcome can be retried automatically
    pub fixable: bool,
}

impl FixFailure {
    pub const ALREADY_VALID: &'static str = "Configuration already valid";

    pub fn manual(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fixable: false,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::manual(ErrorKind::UnknownError, message)
    }
}

/// Outcome of executing one fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FixResult {
    pub fix_id: FixId,
    pub success: bool,
    /// Changes actually applied (empty on failure)
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FixFailure>,
}

impl FixResult {
    pub fn applied(fix_id: FixId, changes: Vec<Change>) -> Self {
        Self {
            fix_id,
            success: true,
            changes,
            error: None,
        }
    }

    pub fn failed(fix_id: FixId, failure: FixFailure) -> Self {
        Self {
            fix_id,
            success: false,
            changes: Vec::new(),
            error: Some(failure),
        }
    }

    /// True when the fix was a no-op rather than a failure
    pub fn is_already_valid(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.message == FixFailure::ALREADY_VALID)
    }
}
