use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Value {value} does not fit in a {width}-byte field")]
    Overflow { value: u64, width: u8 },

    #[error("Cannot allot tiers for {pages} pages with root length {max_root_len} and order {order}")]
    Unallottable {
        pages: u64,
        max_root_len: u64,
        order: usize,
    },

    #[error("Zero-sized request")]
    ZeroSize,

    #[error("Position {0} is outside the managed region")]
    OutOfRegion(u64),

    #[error("Position {0} is not the start of an allocated chunk")]
    NotAllocated(u64),

    #[error("Boundary tag mismatch at position {0}")]
    BoundaryMismatch(u64),

    #[error("Bad section: {0}")]
    BadSection(String),

    #[error("B-tree structure violated: {0}")]
    Structure(String),

    #[error("Corrupted node at position {0}")]
    CorruptNode(u64),

    #[error("Node space exhausted: {needed} pages requested, {available} free")]
    NodeSpaceExhausted { needed: u64, available: u64 },

    #[error("Root record overflow: {holes} holes exceed capacity {capacity}")]
    RootOverflow { holes: usize, capacity: usize },

    #[error("Payload access of {len} bytes at offset {offset} exceeds lump capacity {capacity}")]
    PayloadOverflow { offset: u64, len: u64, capacity: u64 },
}

impl SpaceError {
    /// True for errors that mean the on-disk structure can no longer be trusted.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SpaceError::NotAllocated(_)
                | SpaceError::BoundaryMismatch(_)
                | SpaceError::BadSection(_)
                | SpaceError::Structure(_)
                | SpaceError::CorruptNode(_)
                | SpaceError::NodeSpaceExhausted { .. }
                | SpaceError::RootOverflow { .. }
        )
    }

    pub(crate) fn structure(message: impl Into<String>) -> Self {
        SpaceError::Structure(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SpaceError>;
