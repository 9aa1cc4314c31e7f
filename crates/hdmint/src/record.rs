use crate::Address;

/// One generated credential: a mnemonic and the address it controls at
/// `m/44'/60'/0'/0/0`.
///
/// The pair is produced together by [`Deriver::derive`](crate::Deriver::derive)
/// and never modified afterwards, so `address` always corresponds to
/// `mnemonic`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    mnemonic: String,
    address: Address,
}

impl Record {
    pub(crate) const fn new(mnemonic: String, address: Address) -> Self {
        Self { mnemonic, address }
    }

    /// The 12 space-separated lowercase English words.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub const fn address(&self) -> &Address {
        &self.address
    }
}
