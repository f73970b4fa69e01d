use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    AlreadyExists,
    DoesNotExist,
    Modified,
    AccessDenied,
}

/// A problem found while resolving an action against the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub kind: ValidationKind,
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub fn new(kind: ValidationKind, path: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} ({})", self.kind, self.path, self.message)
    }
}
