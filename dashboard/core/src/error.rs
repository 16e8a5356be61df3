use crate::k8s::quantity;
use serde::Serialize;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Identifies a namespaced resource in error messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(ResourceRef),

    #[error("cluster API request failed: {0}")]
    Unavailable(#[source] BoxError),

    #[error("invalid {field} quantity {value:?}: {source}")]
    InvalidQuantity {
        field: &'static str,
        value: String,
        #[source]
        source: quantity::ParseError,
    },

    #[error("invalid resource object: {0}")]
    InvalidObject(#[from] serde_json::Error),

    #[error("resource object must set metadata.name")]
    MissingName,

    #[error("conflicting write to {resource}: {message}")]
    WriteConflict {
        resource: ResourceRef,
        message: String,
    },
}

/// A stable, machine-readable classification of an [`Error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Unavailable,
    InvalidInput,
    WriteConflict,
}

// === impl ResourceRef ===

impl ResourceRef {
    pub fn new(kind: impl ToString, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

// === impl Error ===

impl Error {
    pub fn unavailable(error: impl Into<BoxError>) -> Self {
        Self::Unavailable(error.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::InvalidQuantity { .. } | Self::InvalidObject(_) | Self::MissingName => {
                ErrorCode::InvalidInput
            }
            Self::WriteConflict { .. } => ErrorCode::WriteConflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let not_found = Error::NotFound(ResourceRef::new("Pod", "default", "web-0"));
        assert_eq!(not_found.code(), ErrorCode::NotFound);
        assert_eq!(not_found.to_string(), "Pod default/web-0 not found");

        let quantity = Error::InvalidQuantity {
            field: "cpu",
            value: "bad-value".to_string(),
            source: "bad-value".parse::<crate::k8s::K8sQuantity>().unwrap_err(),
        };
        assert_eq!(quantity.code(), ErrorCode::InvalidInput);
        assert_eq!(Error::MissingName.code(), ErrorCode::InvalidInput);
        assert_eq!(Error::unavailable("connection refused").code(), ErrorCode::Unavailable);
    }

    #[test]
    fn code_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::WriteConflict).unwrap(),
            r#""write_conflict""#
        );
    }
}
