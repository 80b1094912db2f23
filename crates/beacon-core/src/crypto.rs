//! Cryptographic primitives for beaconing.
//!
//! Provides two things:
//!   1. Hop MACs — keyed BLAKE3 over a 16-byte MAC input. The key is
//!      derived from the AS master secret and never leaves this module.
//!   2. AS entry signatures — Ed25519, one signing identity per AS.
//!
//! All key material derives ZeroizeOnDrop.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Domain separation string for hop MAC key derivation.
const HOP_KEY_CONTEXT: &str = "beacon 2024 hop field mac key";

/// Shortest master secret accepted for key derivation.
pub const MIN_MASTER_SECRET_LEN: usize = 16;

/// Width of a full, untruncated hop MAC.
pub const FULL_MAC_LEN: usize = 32;

// ── Hop MAC ───────────────────────────────────────────────────────────────────

/// Generate a random 32-byte master secret.
pub fn generate_master_secret() -> Zeroizing<[u8; 32]> {
    let mut secret = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(&mut secret[..]);
    secret
}

/// Key for hop-field MACs, derived from the AS master secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HopKey {
    key: [u8; 32],
}

impl HopKey {
    /// Derive the hop key from a master secret.
    ///
    /// Fails on secrets shorter than [`MIN_MASTER_SECRET_LEN`]; a short or
    /// empty secret is never stretched into a usable key.
    pub fn derive(master_secret: &[u8]) -> Result<Self, CryptoError> {
        if master_secret.len() < MIN_MASTER_SECRET_LEN {
            return Err(CryptoError::WeakMasterSecret(master_secret.len()));
        }
        Ok(Self {
            key: blake3::derive_key(HOP_KEY_CONTEXT, master_secret),
        })
    }
}

/// One MAC computation in progress.
pub struct HopMac(blake3::Hasher);

impl HopMac {
    pub fn keyed(key: &HopKey) -> Self {
        Self(blake3::Hasher::new_keyed(&key.key))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; FULL_MAC_LEN] {
        *self.0.finalize().as_bytes()
    }
}

/// Hands out a fresh MAC instance for every hop field.
///
/// Extenders hold one of these instead of a key so that key rotation or
/// an external key service can sit behind it. Errors are hard failures.
pub trait MacFactory: Send + Sync {
    fn new_mac(&self) -> Result<HopMac, CryptoError>;
}

impl MacFactory for HopKey {
    fn new_mac(&self) -> Result<HopMac, CryptoError> {
        Ok(HopMac::keyed(self))
    }
}

/// MAC a complete input block at full width.
pub fn compute_mac(factory: &dyn MacFactory, input: &[u8]) -> Result<[u8; FULL_MAC_LEN], CryptoError> {
    let mut mac = factory.new_mac()?;
    mac.update(input);
    Ok(mac.finalize())
}

// ── Signing ───────────────────────────────────────────────────────────────────

/// Signs AS entries on behalf of the local AS.
pub trait Signer: Send + Sync {
    /// Ed25519 public key recorded next to each signature.
    fn public_key(&self) -> [u8; 32];

    fn sign(&self, message: &[u8]) -> Result<[u8; 64], CryptoError>;
}

/// An AS's long-term Ed25519 signing key.
pub struct SigningIdentity {
    key: SigningKey,
}

impl SigningIdentity {
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut secret[..]);
        Self::from_secret(*secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&secret),
        }
    }

    /// Serialize the secret key for persistent storage.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes())
    }
}

impl Signer for SigningIdentity {
    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Result<[u8; 64], CryptoError> {
        Ok(self.key.sign(message).to_bytes())
    }
}

/// Verify an Ed25519 signature made by [`Signer::sign`].
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::BadPublicKey)?;
    key.verify_strict(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::BadSignature)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("master secret too short: {0} bytes, need at least {}", MIN_MASTER_SECRET_LEN)]
    WeakMasterSecret(usize),

    #[error("hop MAC key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("malformed public key")]
    BadPublicKey,

    #[error("signature verification failed")]
    BadSignature,
}
