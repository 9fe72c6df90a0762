use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    InvalidInput,
    NotFound,
    Conflict,
    HasDependents,
    Unavailable,
    Inconsistent,
    Unknown,
}

/// Library error with a stable machine code and a caller-safe public message.
///
/// The `source` chain is for operator logs only; `public` is the full extent of
/// what a caller may learn about someone else's graph.
#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            source,
        }
    }

    /// Access denial with the uniform message required by the permission model.
    pub fn access_denied(source: anyhow::Error) -> Self {
        Self::forbidden("You are not authorized to access this family graph", source)
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code,
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "conflict",
            public,
            source,
        }
    }

    pub fn has_dependents(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::HasDependents,
            code: "has_dependents",
            public,
            source,
        }
    }

    pub fn unavailable(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unavailable,
            code: "dependency_unavailable",
            public,
            source,
        }
    }

    pub fn inconsistent(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Inconsistent,
            code: "inconsistent_graph",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.public)
    }
}

impl std::error::Error for LibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
