//! Error types for the PDF writer.
//!
//! This module defines all error types that can occur while serializing,
//! encrypting, or linearizing a PDF object graph.

/// Result type alias for PDF writer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during PDF writing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Incompatible configuration options. Raised when the offending option
    /// is set, before any output is produced.
    #[error("Invalid configuration: {0}")]
    Usage(String),

    /// Malformed input graph reached the writer.
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Referenced object not present in the input document.
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type for the context it was found in.
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Stream filtering failed even after the raw retry.
    #[error("Error in stream data of object {id} {gen}: {reason}")]
    Stream {
        /// Object number of the offending stream
        id: u32,
        /// Generation number of the offending stream
        gen: u16,
        /// What went wrong
        reason: String,
    },

    /// Stream decoding error.
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter.
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Internal invariant failure: padding mismatch, pipeline popped out of
    /// order, negative new id. Fatal; no output is written.
    #[error("Internal logic error: {0}")]
    Internal(String),

    /// IO error from the output sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error() {
        let err = Error::Usage("PCLm output cannot be linearized".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("linearized"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        let msg = format!("{}", err);
        assert!(msg.contains("10 0 R"));
    }

    #[test]
    fn test_stream_error_carries_object_id() {
        let err = Error::Stream {
            id: 7,
            gen: 0,
            reason: "flate decode failed".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("object 7 0"));
        assert!(msg.contains("flate decode failed"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::Internal("insufficient padding reserved for cross-reference stream".to_string());
        assert!(format!("{}", err).contains("Internal logic error"));
    }
}
