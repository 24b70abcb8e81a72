use thiserror::Error;

/// All failures a single conversion can produce. A conversion either emits a
/// complete object or fails with one of these; there is no partial output.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("address {address:#010x} does not fall inside any segment ({table} entry {index})")]
    UnresolvedAddress {
        address: u32,
        table: &'static str,
        index: usize,
    },

    #[error("duplicate export name `{0}`")]
    DuplicateKey(String),

    #[error("write past the reserved {table} region at byte {at}")]
    BufferOverrun { table: &'static str, at: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::MalformedInput(what.into())
    }
}
