use crate::{Error, Result};
use core::{fmt, str::FromStr};

/// Child indices at or above this value use hardened derivation.
pub const HARDENED_OFFSET: u32 = 1 << 31;

/// One step of a BIP32 derivation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildIndex {
    /// Non-hardened child; derivable from the parent public key.
    Normal(u32),
    /// Hardened child; requires the parent private key.
    Hardened(u32),
}

impl ChildIndex {
    /// Creates a non-hardened index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `index` has the hardened bit set.
    pub fn normal(index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(Error::InvalidPath(format!("index {index} out of range")));
        }
        Ok(Self::Normal(index))
    }

    /// Creates a hardened index from its unhardened number (`44` for `44'`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `index` has the hardened bit set.
    pub fn hardened(index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(Error::InvalidPath(format!("index {index} out of range")));
        }
        Ok(Self::Hardened(index))
    }

    /// The 32-bit value serialized into the HMAC input (`ser32(i)`).
    pub const fn to_bits(self) -> u32 {
        match self {
            Self::Normal(i) => i,
            Self::Hardened(i) => i | HARDENED_OFFSET,
        }
    }

    pub const fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(i) => write!(f, "{i}"),
            Self::Hardened(i) => write!(f, "{i}'"),
        }
    }
}

impl FromStr for ChildIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (digits, hardened) = match s.strip_suffix(['\'', 'h', 'H']) {
            Some(digits) => (digits, true),
            None => (s, false),
        };
        let index = digits
            .parse::<u32>()
            .map_err(|e| Error::InvalidPath(format!("{s:?}: {e}")))?;
        if hardened {
            Self::hardened(index)
        } else {
            Self::normal(index)
        }
    }
}

/// The BIP44 path to the first external Ethereum address, `m/44'/60'/0'/0/0`.
///
/// purpose 44, coin type 60, account 0, external chain, address index 0.
pub const ETHEREUM_PATH: [ChildIndex; 5] = [
    ChildIndex::Hardened(44),
    ChildIndex::Hardened(60),
    ChildIndex::Hardened(0),
    ChildIndex::Normal(0),
    ChildIndex::Normal(0),
];

/// A parsed BIP32 path such as `m/44'/60'/0'/0/0`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<ChildIndex>);

impl DerivationPath {
    /// The fixed path used for every generated address.
    pub fn ethereum() -> Self {
        Self(ETHEREUM_PATH.to_vec())
    }

    pub fn as_slice(&self) -> &[ChildIndex] {
        &self.0
    }
}

impl From<Vec<ChildIndex>> for DerivationPath {
    fn from(indices: Vec<ChildIndex>) -> Self {
        Self(indices)
    }
}

impl AsRef<[ChildIndex]> for DerivationPath {
    fn as_ref(&self) -> &[ChildIndex] {
        &self.0
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(Error::InvalidPath(format!("{s:?} must start with \"m\"")));
        }
        parts
            .map(str::parse)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}
