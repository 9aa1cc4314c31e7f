//! BIP39 mnemonics and seeds.
//!
//! Mnemonics are always built from fresh entropy through
//! [`Mnemonic::from_entropy`], which appends the SHA-256 checksum nibble and
//! maps each 11-bit group onto the English wordlist. The checksum is therefore
//! valid by construction. Seeds are PBKDF2-HMAC-SHA512 with 2048 rounds and the
//! salt `"mnemonic" || passphrase`.

use crate::{ENTROPY_BYTES, EntropySource, Error, Result};
use zeroize::Zeroizing;

pub use bip39::Mnemonic;

/// Words in every mnemonic this crate produces or accepts.
pub const WORD_COUNT: usize = 12;

/// Size of a BIP39 seed in bytes.
pub const SEED_BYTES: usize = 64;

/// A BIP39 seed, wiped from memory when dropped.
pub type Seed = Zeroizing<[u8; SEED_BYTES]>;

/// Draws 128 bits from `entropy` and encodes them as a 12-word mnemonic.
///
/// # Errors
///
/// Returns [`Error::CryptoUnavailable`] if the entropy source fails.
pub fn generate_mnemonic<E: EntropySource + ?Sized>(entropy: &E) -> Result<Mnemonic> {
    let mut bytes = Zeroizing::new([0_u8; ENTROPY_BYTES]);
    entropy.fill(bytes.as_mut_slice())?;
    Mnemonic::from_entropy(bytes.as_slice())
        .map_err(|e| Error::crypto(format_args!("mnemonic encoding: {e}")))
}

/// Parses a 12-word English phrase, validating every word and the checksum.
///
/// Surrounding and repeated whitespace is ignored and words are matched
/// case-insensitively.
///
/// # Errors
///
/// Returns [`Error::InvalidMnemonic`] for an unknown word, a bad checksum or a
/// word count other than [`WORD_COUNT`].
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let normalized = phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    let mnemonic =
        Mnemonic::parse_normalized(&normalized).map_err(|e| Error::InvalidMnemonic(e.to_string()))?;

    let words = mnemonic.word_count();
    if words != WORD_COUNT {
        return Err(Error::InvalidMnemonic(format!(
            "expected {WORD_COUNT} words, got {words}"
        )));
    }

    Ok(mnemonic)
}

/// Stretches a mnemonic into its 64-byte seed.
///
/// `passphrase` must already be NFKD-normalized; ASCII passphrases (including
/// the empty one used by the pipeline) always are.
pub fn mnemonic_to_seed(mnemonic: &Mnemonic, passphrase: &str) -> Seed {
    Zeroizing::new(mnemonic.to_seed_normalized(passphrase))
}
