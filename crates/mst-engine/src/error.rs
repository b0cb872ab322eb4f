//! Error types for tree operations

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for tree operations
pub type Result<T> = std::result::Result<T, MstError>;

/// Tree operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct MstError {
    kind: MstErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for tree operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MstErrorKind {
    /// Requested block is absent from the backing store
    NotFound,
    /// Loaded bytes do not hash to the requested CID
    HashMismatch,
    /// Bytes are not a valid MST node
    MalformedNode,
    /// Key is not present in the tree
    KeyNotFound,
    /// Key is not a valid MST key
    InvalidKey,
    /// Key already present (create-only write)
    AlreadyExists,
    /// Expected previous value did not match the tree
    PrevMismatch,
    /// A proof could not be constructed
    Proof,
    /// A proof failed verification
    InvalidProof,
    /// Write attempted against a read-only store
    ReadOnly,
    /// Serialization/deserialization failed
    Serialization,
    /// CAR archive is malformed or unsupported
    Car,
    /// I/O error
    Io,
}

impl MstError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: MstErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> MstErrorKind {
        self.kind
    }

    /// True if this is a logical "key absent" outcome rather than a fault
    pub fn is_key_not_found(&self) -> bool {
        self.kind == MstErrorKind::KeyNotFound
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(MstErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create a hash mismatch error
    pub fn hash_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::new(MstErrorKind::HashMismatch, None)
            .with_context(format!("expected {}, block hashes to {}", expected, actual))
            .with_help("the backing store returned corrupt or tampered data")
    }

    /// Create a malformed node error
    pub fn malformed_node(msg: impl Into<String>) -> Self {
        Self::new(MstErrorKind::MalformedNode, Some(msg.into().into()))
            .with_help("MST nodes must be canonical DAG-CBOR with sorted, prefix-compressed keys")
    }

    /// Create a key not found error
    pub fn key_not_found(key: impl fmt::Display) -> Self {
        Self::new(MstErrorKind::KeyNotFound, None).with_context(format!("key: {}", key))
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(MstErrorKind::InvalidKey, None)
            .with_help("MST keys must match [a-zA-Z0-9._:~/-]+, max 256 bytes")
            .with_context(format!("key: {}", key.into()))
    }

    /// Create an already exists error
    pub fn already_exists(key: impl fmt::Display) -> Self {
        Self::new(MstErrorKind::AlreadyExists, None).with_context(format!("key: {}", key))
    }

    /// Create a prev mismatch error
    pub fn prev_mismatch(
        key: impl fmt::Display,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::new(MstErrorKind::PrevMismatch, None).with_context(format!(
            "key {}: expected {}, found {}",
            key, expected, actual
        ))
    }

    /// Create an invalid proof error
    pub fn invalid_proof(msg: impl Into<String>) -> Self {
        Self::new(MstErrorKind::InvalidProof, Some(msg.into().into()))
    }

    /// Create a read-only store error
    pub fn read_only(store: &str) -> Self {
        Self::new(MstErrorKind::ReadOnly, None).with_context(format!("{} is read-only", store))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(MstErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create a CAR file error
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(MstErrorKind::Car, Some(Box::new(source)))
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(MstErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for MstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

impl From<std::io::Error> for MstError {
    fn from(e: std::io::Error) -> Self {
        MstError::io(e)
    }
}

// Internal granular errors

/// Key validation errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum KeyError {
    /// Empty key not allowed
    #[error("Empty key not allowed")]
    Empty,

    /// Key too long
    #[error("Key too long: {len} bytes (max {max})")]
    TooLong {
        /// Actual key length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Invalid key characters
    #[error("Invalid key characters: {key}")]
    InvalidChars {
        /// The invalid key
        key: String,
    },
}

impl From<KeyError> for MstError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::Empty => MstError::invalid_key(""),
            KeyError::TooLong { len, max } => {
                MstError::invalid_key(format!("length {}/{}", len, max))
            }
            KeyError::InvalidChars { key } => MstError::invalid_key(key),
        }
    }
}

/// Node decoding errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum NodeError {
    /// CBOR framing did not match the node schema
    #[error("Invalid node framing")]
    Framing(#[source] BoxError),

    /// Prefix length longer than the previous key
    #[error("Prefix length {prefix_len} exceeds previous key length {prev_len}")]
    PrefixTooLong {
        /// Declared prefix length
        prefix_len: usize,
        /// Length of the previous key in bytes
        prev_len: usize,
    },

    /// Prefix length is shorter than the bytes actually shared
    #[error("Non-canonical prefix length {prefix_len} at entry {index}")]
    NonCanonicalPrefix {
        /// Declared prefix length
        prefix_len: usize,
        /// Entry index in the node
        index: usize,
    },

    /// Prefix length does not fit the wire type
    #[error("Prefix length {0} exceeds u8::MAX")]
    PrefixOverflow(usize),

    /// Keys not strictly increasing
    #[error("Keys out of order at entry {index}")]
    KeyOrder {
        /// Entry index in the node
        index: usize,
    },

    /// Key bytes are not valid UTF-8
    #[error("Invalid UTF-8 in key at entry {index}")]
    InvalidUtf8 {
        /// Entry index in the node
        index: usize,
    },

    /// Subtree vector does not line up with entries
    #[error("Expected {expected} subtree slots, got {actual}")]
    SubtreeCount {
        /// Entries + 1
        expected: usize,
        /// Slots provided
        actual: usize,
    },
}

impl From<NodeError> for MstError {
    fn from(e: NodeError) -> Self {
        MstError::new(MstErrorKind::MalformedNode, Some(Box::new(e)))
            .with_help("MST nodes must be canonical DAG-CBOR with sorted, prefix-compressed keys")
    }
}

/// CAR archive errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CarError {
    /// Only CAR v1 is supported
    #[error("Unsupported CAR version {0}")]
    #[diagnostic(code(car::version), help("only CARv1 archives are supported"))]
    UnsupportedVersion(u64),

    /// Archive ended in the middle of a section
    #[error("Unexpected end of archive in {0}")]
    #[diagnostic(code(car::truncated))]
    Truncated(&'static str),

    /// Section length is smaller than the CID it must contain
    #[error("Section of {len} bytes cannot hold its CID")]
    #[diagnostic(code(car::section))]
    ShortSection {
        /// Declared section length
        len: u64,
    },

    /// Block hash cannot be validated
    #[error("Unsupported multihash code {0:#x}")]
    #[diagnostic(code(car::hash), help("only sha2-256 block hashes can be validated"))]
    UnsupportedHash(u64),

    /// Header could not be decoded
    #[error("Invalid CAR header")]
    #[diagnostic(code(car::header))]
    Header(#[source] BoxError),

    /// Section CID could not be decoded
    #[error("Invalid section CID")]
    #[diagnostic(code(car::cid))]
    Cid(#[source] BoxError),
}

impl From<CarError> for MstError {
    fn from(e: CarError) -> Self {
        MstError::car(e)
    }
}

/// Proof construction errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ProofError {
    /// Inclusion proof requested for an absent key
    #[error("Cannot build inclusion proof: {key} is not in the tree")]
    #[diagnostic(code(proof::key_absent))]
    KeyAbsent {
        /// The key
        key: String,
    },

    /// Exclusion proof requested for a present key
    #[error("Cannot build exclusion proof: {key} is in the tree")]
    #[diagnostic(code(proof::key_present))]
    KeyPresent {
        /// The key
        key: String,
    },
}

impl From<ProofError> for MstError {
    fn from(e: ProofError) -> Self {
        MstError::new(MstErrorKind::Proof, Some(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context_and_source() {
        let err = MstError::malformed_node("bad framing").with_context("node 3");
        let text = err.to_string();
        assert!(text.starts_with("MalformedNode"));
        assert!(text.contains("node 3"));
        assert!(text.contains("bad framing"));
    }

    #[test]
    fn test_granular_conversions() {
        let err: MstError = KeyError::Empty.into();
        assert_eq!(err.kind(), MstErrorKind::InvalidKey);

        let err: MstError = NodeError::KeyOrder { index: 2 }.into();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);

        let err: MstError = CarError::UnsupportedVersion(2).into();
        assert_eq!(err.kind(), MstErrorKind::Car);

        let err: MstError = ProofError::KeyAbsent { key: "a".into() }.into();
        assert_eq!(err.kind(), MstErrorKind::Proof);
    }

    #[test]
    fn test_key_not_found_is_control_flow() {
        assert!(MstError::key_not_found("a/b").is_key_not_found());
        assert!(!MstError::not_found("block", "bafy").is_key_not_found());
    }
}
