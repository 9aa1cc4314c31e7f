use crate::{Error, Result};
use rand::{TryRngCore, rngs::OsRng};

/// Number of entropy bytes behind a 12-word mnemonic (128 bits).
pub const ENTROPY_BYTES: usize = 16;

/// A trait for sources of cryptographically secure random bytes.
///
/// This abstraction allows you to plug in the operating system generator or a
/// fixed/failing source in tests. Implementations must report failure rather
/// than fill `dest` with anything weaker.
///
/// # Example
/// ```
/// use hdmint::{EntropySource, Result};
///
/// struct Zeroes;
/// impl EntropySource for Zeroes {
///     fn fill(&self, dest: &mut [u8]) -> Result<()> {
///         dest.fill(0);
///         Ok(())
///     }
/// }
///
/// let mut buf = [0xff_u8; 4];
/// Zeroes.fill(&mut buf).unwrap();
/// assert_eq!(buf, [0; 4]);
/// ```
pub trait EntropySource {
    /// Fills `dest` entirely with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// An [`EntropySource`] backed by the operating system CSPRNG (`OsRng`).
///
/// Each call reads straight from the OS, so this zero-sized type holds no
/// state and may be freely copied across threads. Unlike `rand::rng()` it
/// never falls back to a userspace generator; an OS failure surfaces as
/// [`Error::CryptoUnavailable`].
#[derive(Default, Clone, Copy, Debug)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::crypto(format_args!("os entropy: {e}")))
    }
}

impl<E: EntropySource + ?Sized> EntropySource for &E {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        (**self).fill(dest)
    }
}
