/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the derivation engine can produce.
///
/// Only [`Error::CryptoUnavailable`] is expected at runtime when generating
/// fresh credentials, and it is never papered over: a failing entropy source or
/// primitive aborts the derivation instead of returning a weaker value. The
/// other variants come from caller-supplied input (phrases, paths) or from the
/// astronomically unlikely invalid-key cases defined by BIP32.
#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The entropy source or a cryptographic primitive failed.
    #[error("cryptography unavailable: {reason}")]
    CryptoUnavailable {
        /// What failed, as reported by the underlying primitive.
        reason: String,
    },

    /// A phrase was not a valid 12-word English BIP39 mnemonic.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// The seed produced a master key outside the curve order (BIP32).
    #[error("seed produced an invalid master key")]
    InvalidMasterKey,

    /// Child key derivation produced an unusable key at this index (BIP32).
    #[error("invalid child key at index {index:#010x}")]
    InvalidChildKey {
        /// The raw child index, hardened bit included.
        index: u32,
    },

    /// A derivation path string could not be parsed.
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),
}

impl Error {
    pub(crate) fn crypto(reason: impl core::fmt::Display) -> Self {
        Self::CryptoUnavailable {
            reason: reason.to_string(),
        }
    }
}
