use thiserror::Error;

/// Failures of the key codec. A reserved character inside a real resource id
/// means the id cannot be stored without mangling it, so these are treated as
/// configuration errors rather than skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("empty key")]
    Empty,

    #[error("reserved character '{character}' in '{input}'")]
    ReservedCharacter { character: char, input: String },

    #[error("unescaped path separator in key '{0}'")]
    UnescapedSeparator(String),

    #[error("malformed combination key '{0}'")]
    MalformedCombination(String),
}

#[derive(Error, Debug)]
pub enum ChaosError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    TransientStore(String),

    #[error("empty population: {0}")]
    EmptyPopulation(String),

    #[error("invalid trigger payload: {0}")]
    InvalidPayload(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ChaosError {
    /// Whether the next tick may succeed without any change to configuration.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChaosError::TransientStore(_) | ChaosError::Io(_))
    }

    /// Whether the failure aborts the current tick as a configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ChaosError::Configuration(_) | ChaosError::Key(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ChaosError::TransientStore("timeout".into()).is_transient());
        assert!(!ChaosError::TransientStore("timeout".into()).is_configuration());
        assert!(ChaosError::Key(KeyError::Empty).is_configuration());
        assert!(ChaosError::Configuration("x".into()).is_configuration());
        assert!(!ChaosError::EmptyPopulation("vm".into()).is_transient());
    }
}
