use serde::{Deserialize, Serialize};

/// Coarse classification shared by every error type in the workspace.
///
/// Callers branch on the kind rather than on concrete variants; the HTTP layer
/// maps each kind onto a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Nothing was written.
    Validation,
    /// The request is well-formed but the current state forbids it.
    Conflict,
    NotFound,
    /// A store or gateway failed or timed out.
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
