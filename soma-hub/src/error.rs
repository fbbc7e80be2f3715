use thiserror::Error;

/// Erreurs du plan de contrôle.
///
/// Chaque variante correspond à une classe d'échec observable par les
/// clients HTTP ou par le bus. Le mapping vers les codes HTTP vit dans
/// `http.rs`, jamais ici.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("component '{0}' is already registered")]
    DuplicateName(String),

    #[error("unknown component or metric: {0}")]
    UnknownComponent(String),

    #[error("registry is full ({capacity} components max)")]
    RegistryFull { capacity: usize },

    #[error("schema violation on field '{field}': {detail}")]
    SchemaViolation { field: String, detail: String },

    #[error("unsupported adaptation kind: {0}")]
    UnsupportedAdaptation(String),

    #[error("component rejected the command: {0}")]
    ComponentRejected(String),

    #[error("malformed request body: {0}")]
    MalformedRequestBody(String),
}

impl HubError {
    /// Champ requis absent du payload.
    pub fn missing_field(field: &str) -> Self {
        HubError::SchemaViolation {
            field: field.to_string(),
            detail: "required field is missing".to_string(),
        }
    }

    /// Champ présent mais du mauvais type.
    pub fn mistyped_field(field: &str, expected: &str) -> Self {
        HubError::SchemaViolation {
            field: field.to_string(),
            detail: format!("expected {expected}"),
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;
