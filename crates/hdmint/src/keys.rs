//! BIP32 hierarchical deterministic private keys over secp256k1.

use crate::{ChildIndex, Error, Result};
use hmac::{Hmac, Mac};
use k256::{
    FieldBytes, NonZeroScalar, Scalar, SecretKey,
    elliptic_curve::{PrimeField, sec1::ToEncodedPoint},
};
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

type HmacSha512 = Hmac<Sha512>;

/// HMAC key for deriving the master node from a seed.
const MASTER_KEY_SALT: &[u8] = b"Bitcoin seed";

/// A BIP32 extended private key: a secp256k1 secret plus its chain code.
///
/// Secret material lives in types that wipe themselves on drop.
#[derive(Clone)]
pub struct ExtendedPrivateKey {
    secret: SecretKey,
    chain_code: Zeroizing<[u8; 32]>,
    depth: u8,
}

impl core::fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExtendedPrivateKey")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl ExtendedPrivateKey {
    /// Derives the master node `m` from a seed (normally the 64-byte BIP39
    /// seed; BIP32 allows 16 to 64 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMasterKey`] if the left half of the HMAC output
    /// is zero or not below the curve order.
    pub fn new_master(seed: &[u8]) -> Result<Self> {
        let (il, ir) = hmac_sha512(MASTER_KEY_SALT, &[seed])?;
        let secret = SecretKey::from_slice(il.as_slice()).map_err(|_| Error::InvalidMasterKey)?;
        Ok(Self {
            secret,
            chain_code: ir,
            depth: 0,
        })
    }

    /// Derives one child (CKDpriv).
    ///
    /// Hardened children hash `0x00 || ser256(k)`, normal children hash the
    /// compressed parent public key; both append `ser32(i)` big-endian. The
    /// child key is `parse256(IL) + k (mod n)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChildKey`] if `IL` is not below the curve order
    /// or the resulting key is zero.
    pub fn derive_child(&self, index: ChildIndex) -> Result<Self> {
        let bits = index.to_bits();
        let ser32 = bits.to_be_bytes();

        let (il, ir) = if index.is_hardened() {
            let mut data = Zeroizing::new([0_u8; 33]);
            data[1..].copy_from_slice(&self.secret_bytes()[..]);
            hmac_sha512(&self.chain_code[..], &[&data[..], &ser32[..]])?
        } else {
            let public = self.secret.public_key().to_encoded_point(true);
            hmac_sha512(&self.chain_code[..], &[public.as_bytes(), &ser32[..]])?
        };

        let tweak = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(*il)))
            .ok_or(Error::InvalidChildKey { index: bits })?;

        let child = Option::<NonZeroScalar>::from(NonZeroScalar::new(
            tweak + *self.secret.to_nonzero_scalar(),
        ))
        .ok_or(Error::InvalidChildKey { index: bits })?;

        Ok(Self {
            secret: SecretKey::from(child),
            chain_code: ir,
            depth: self.depth.saturating_add(1),
        })
    }

    /// Walks `path` from this node, one [`derive_child`](Self::derive_child)
    /// per step.
    pub fn derive_path(&self, path: &[ChildIndex]) -> Result<Self> {
        path.iter()
            .try_fold(self.clone(), |key, &index| key.derive_child(index))
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub const fn depth(&self) -> u8 {
        self.depth
    }

    /// The 32-byte big-endian private scalar.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut out = Zeroizing::new([0_u8; 32]);
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// The uncompressed public key `X || Y` without the `0x04` SEC1 prefix.
    pub fn public_key_uncompressed(&self) -> [u8; 64] {
        let point = self.secret.public_key().to_encoded_point(false);
        let mut out = [0_u8; 64];
        // Uncompressed SEC1 encoding is always 65 bytes.
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }
}

fn hmac_sha512(
    key: &[u8],
    parts: &[&[u8]],
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    let mut mac = HmacSha512::new_from_slice(key).map_err(Error::crypto)?;
    for part in parts {
        mac.update(part);
    }
    let mut digest = mac.finalize().into_bytes();

    let mut il = Zeroizing::new([0_u8; 32]);
    let mut ir = Zeroizing::new([0_u8; 32]);
    il.copy_from_slice(&digest[..32]);
    ir.copy_from_slice(&digest[32..]);
    digest[..].zeroize();
    Ok((il, ir))
}
