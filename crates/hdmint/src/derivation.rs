use crate::{
    Address, ETHEREUM_PATH, EntropySource, ExtendedPrivateKey, Mnemonic, OsEntropy, Record, Result,
    generate_mnemonic, mnemonic_to_seed, parse_mnemonic,
};

/// Derives the `m/44'/60'/0'/0/0` address for a BIP39 seed.
pub fn address_from_seed(seed: &[u8; crate::SEED_BYTES]) -> Result<Address> {
    let key = ExtendedPrivateKey::new_master(seed.as_slice())?.derive_path(&ETHEREUM_PATH)?;
    Ok(Address::from_public_key(&key.public_key_uncompressed()))
}

/// Derives the address for a mnemonic with the empty passphrase.
pub fn address_from_mnemonic(mnemonic: &Mnemonic) -> Result<Address> {
    address_from_seed(&mnemonic_to_seed(mnemonic, ""))
}

/// Parses `phrase` and derives its address.
///
/// # Errors
///
/// Returns [`Error::InvalidMnemonic`](crate::Error::InvalidMnemonic) if the
/// phrase is not a valid 12-word English mnemonic.
pub fn address_from_phrase(phrase: &str) -> Result<Address> {
    address_from_mnemonic(&parse_mnemonic(phrase)?)
}

/// Produces fresh [`Record`]s from an entropy source.
///
/// A `Deriver` holds no mutable state; calls are independent and may run
/// concurrently from any number of threads when `E` is `Sync`.
///
/// # Example
/// ```
/// use hdmint::{Deriver, is_checksum_valid};
///
/// let record = Deriver::new().derive().unwrap();
/// assert_eq!(record.mnemonic().split(' ').count(), 12);
/// assert!(is_checksum_valid(&record.address().to_string()));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Deriver<E = OsEntropy> {
    entropy: E,
}

impl Deriver {
    /// A deriver backed by the operating system CSPRNG.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E: EntropySource> Deriver<E> {
    pub const fn with_entropy(entropy: E) -> Self {
        Self { entropy }
    }

    /// Generates one mnemonic and derives its address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CryptoUnavailable`](crate::Error::CryptoUnavailable)
    /// if entropy cannot be drawn. Nothing partial is ever returned.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn derive(&self) -> Result<Record> {
        let mnemonic = generate_mnemonic(&self.entropy)?;
        let address = address_from_mnemonic(&mnemonic)?;
        Ok(Record::new(mnemonic.to_string(), address))
    }
}

/// Generates one [`Record`] from the operating system CSPRNG.
pub fn derive() -> Result<Record> {
    Deriver::new().derive()
}
