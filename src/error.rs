use std::fmt;

/// Pipeline stage reached when a fatal error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Validate,
    Transform,
    Render,
    Serialize,
    Request,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Validate => "validate",
            Stage::Transform => "transform",
            Stage::Render => "render",
            Stage::Serialize => "serialize",
            Stage::Request => "request",
        }
    }
}

#[derive(Debug)]
pub enum FieldMarkError {
    InvalidConfiguration(String),
    Structural {
        stage: Stage,
        field_id: Option<String>,
        message: String,
    },
    Serialization(String),
    Audit(fieldmark_audit::AuditError),
    Io(std::io::Error),
}

impl FieldMarkError {
    pub(crate) fn structural(stage: Stage, message: impl Into<String>) -> Self {
        FieldMarkError::Structural {
            stage,
            field_id: None,
            message: message.into(),
        }
    }

    pub(crate) fn field(stage: Stage, field_id: &str, message: impl Into<String>) -> Self {
        FieldMarkError::Structural {
            stage,
            field_id: Some(field_id.to_string()),
            message: message.into(),
        }
    }

    /// Field id attached to the failure, if the error concerns a single field.
    pub fn field_id(&self) -> Option<&str> {
        match self {
            FieldMarkError::Structural { field_id, .. } => field_id.as_deref(),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            FieldMarkError::Structural { stage, .. } => Some(*stage),
            FieldMarkError::Serialization(_) => Some(Stage::Serialize),
            _ => None,
        }
    }
}

impl fmt::Display for FieldMarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMarkError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            FieldMarkError::Structural {
                stage,
                field_id: Some(id),
                message,
            } => write!(f, "{} failed for field {}: {}", stage.as_str(), id, message),
            FieldMarkError::Structural {
                stage,
                field_id: None,
                message,
            } => write!(f, "{} failed: {}", stage.as_str(), message),
            FieldMarkError::Serialization(message) => {
                write!(f, "serialization error: {}", message)
            }
            FieldMarkError::Audit(err) => write!(f, "audit error: {}", err),
            FieldMarkError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for FieldMarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FieldMarkError::Io(err) => Some(err),
            FieldMarkError::Audit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FieldMarkError {
    fn from(value: std::io::Error) -> Self {
        FieldMarkError::Io(value)
    }
}

impl From<fieldmark_audit::AuditError> for FieldMarkError {
    fn from(value: fieldmark_audit::AuditError) -> Self {
        FieldMarkError::Audit(value)
    }
}
