use thiserror::Error;

/// Fatal extraction failures. Any of these aborts a run before outputs are
/// written or the master document is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error(
        "unsupported record type '{0}' (supported: {supported})",
        supported = crate::master::SUPPORTED_RECORD_TYPE
    )]
    UnsupportedRecordType(String),

    #[error("could not find table header '{header}' in master document")]
    StructureNotFound { header: String },

    #[error("no '{record_type}' choice groups were discovered in master document")]
    NoRecordsFound { record_type: String },
}
