use thiserror::Error;

/// Coarse error family, used by callers to decide whether a failure is
/// the request's fault, the schema's fault, or transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Schema,
    Ingest,
    Index,
    Query,
    Transient,
}

#[derive(Error, Debug)]
pub enum FtsError {
    // Schema validation errors
    #[error("function {function}: field not found: {field}")]
    FieldNotFound { function: String, field: String },

    #[error("function {function}: input field {field} must enable analyzer")]
    InputNotTokenized { function: String, field: String },

    #[error("function {function}: input field {field} must not be nullable")]
    NullableFunctionInput { function: String, field: String },

    #[error("field {field}: multi analyzer by_field {by_field} not found in schema")]
    ByFieldNotFound { field: String, by_field: String },

    #[error("field {field}: multi analyzer params must set by_field")]
    MissingByField { field: String },

    #[error("field {field}: multi analyzer params must contain a \"default\" analyzer")]
    MissingDefaultAnalyzer { field: String },

    #[error("field {field}: invalid analyzer params: {reason}")]
    InvalidAnalyzer { field: String, reason: String },

    #[error("function {function}: {reason}")]
    InvalidFunction { function: String, reason: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("collection already exists with a different schema: {0}")]
    CollectionAlreadyExists(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    // Ingest errors
    #[error("field {field}: type mismatch, expected {expected}, got {actual}")]
    SchemaTypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("missing value for non-nullable field {field}")]
    MissingField { field: String },

    #[error("field {field} is not nullable")]
    NullValue { field: String },

    #[error("field {field}: length {actual} exceeds max_length {max}")]
    MaxLengthExceeded {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("field {field}: dimension mismatch, expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    #[error("field {field} is generated by a function and cannot be written")]
    FunctionOutputProvided { field: String },

    #[error("field {field} is not declared in the schema")]
    UnknownField { field: String },

    // Index errors
    #[error("field {field}: invalid metric type {metric}: {reason}")]
    InvalidMetric {
        field: String,
        metric: String,
        reason: String,
    },

    #[error("field {field}: invalid index type {index_type}")]
    InvalidIndexType { field: String, index_type: String },

    #[error("invalid index param {param}: {reason}")]
    InvalidIndexParam { param: String, reason: String },

    #[error("cannot create index on unknown field {field}")]
    IndexFieldNotFound { field: String },

    #[error("index not found on field {field}")]
    IndexNotFound { field: String },

    // Query errors
    #[error("field {field}: unsupported query type: {reason}")]
    UnsupportedQueryType { field: String, reason: String },

    #[error("invalid filter expression {expr:?}: {reason}")]
    InvalidFilter { expr: String, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("request cancelled")]
    Cancelled,

    // Transient errors
    #[error("segment {segment_id} is sealing")]
    SegmentSealing { segment_id: u64 },

    #[error("operation still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },

    // Config errors
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FtsError>;

impl FtsError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FtsError::FieldNotFound { .. }
            | FtsError::InputNotTokenized { .. }
            | FtsError::NullableFunctionInput { .. }
            | FtsError::ByFieldNotFound { .. }
            | FtsError::MissingByField { .. }
            | FtsError::MissingDefaultAnalyzer { .. }
            | FtsError::InvalidAnalyzer { .. }
            | FtsError::InvalidFunction { .. }
            | FtsError::InvalidSchema(_)
            | FtsError::InvalidCollectionName(_)
            | FtsError::CollectionAlreadyExists(_)
            | FtsError::CollectionNotFound(_)
            | FtsError::Config(_) => ErrorCategory::Schema,

            FtsError::SchemaTypeMismatch { .. }
            | FtsError::MissingField { .. }
            | FtsError::NullValue { .. }
            | FtsError::MaxLengthExceeded { .. }
            | FtsError::DimensionMismatch { .. }
            | FtsError::DuplicatePrimaryKey(_)
            | FtsError::FunctionOutputProvided { .. }
            | FtsError::UnknownField { .. } => ErrorCategory::Ingest,

            FtsError::InvalidMetric { .. }
            | FtsError::InvalidIndexType { .. }
            | FtsError::InvalidIndexParam { .. }
            | FtsError::IndexFieldNotFound { .. }
            | FtsError::IndexNotFound { .. } => ErrorCategory::Index,

            FtsError::UnsupportedQueryType { .. }
            | FtsError::InvalidFilter { .. }
            | FtsError::InvalidParameter(_)
            | FtsError::Cancelled => ErrorCategory::Query,

            FtsError::SegmentSealing { .. } | FtsError::RetriesExhausted { .. } => {
                ErrorCategory::Transient
            }
        }
    }

    /// Whether the caller may retry the identical request.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn status_code(&self) -> u16 {
        match self {
            FtsError::CollectionNotFound(_) | FtsError::IndexNotFound { .. } => 404,

            FtsError::CollectionAlreadyExists(_) | FtsError::DuplicatePrimaryKey(_) => 409,

            FtsError::Cancelled => 499,

            FtsError::Config(_) => 500,

            FtsError::SegmentSealing { .. } | FtsError::RetriesExhausted { .. } => 503,

            _ => 400,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_are_schema_category() {
        let err = FtsError::MissingDefaultAnalyzer {
            field: "content".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Schema);
        assert_eq!(err.status_code(), 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ingest_error_category() {
        let err = FtsError::SchemaTypeMismatch {
            field: "text".into(),
            expected: "VARCHAR".into(),
            actual: "INT64".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Ingest);
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = FtsError::SegmentSealing { segment_id: 7 };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_index_not_found_status_code() {
        let err = FtsError::IndexNotFound {
            field: "sparse".into(),
        };
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.category(), ErrorCategory::Index);
    }

    #[test]
    fn test_cancelled_status_code() {
        assert_eq!(FtsError::Cancelled.status_code(), 499);
        assert_eq!(FtsError::Cancelled.category(), ErrorCategory::Query);
    }

    #[test]
    fn test_display_carries_context() {
        let err = FtsError::NullableFunctionInput {
            function: "bm25".into(),
            field: "article".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bm25"));
        assert!(msg.contains("article"));

        let err = FtsError::InvalidFilter {
            expr: "id <".into(),
            reason: "unexpected end".into(),
        };
        assert!(err.to_string().contains("id <"));
    }
}
