use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

use super::chain::Blockchain;
use super::transaction::{Transaction, TransactionError};

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// SHA-256 digest of a message; signatures are always taken over this digest.
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    Sha256::digest(message).into()
}

/// The public identity of an account: the PEM text of its verifying key.
///
/// Identities are what transactions carry in their `sender`/`recipient`
/// fields. Balances are looked up by the shorter [`Address`] derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Identity(pub String);

impl Identity {
    /// Encodes a verifying key as PEM SubjectPublicKeyInfo text
    pub fn from_public_key(public_key: &VerifyingKey) -> Result<Self, CryptoError> {
        public_key
            .to_public_key_pem(LineEnding::LF)
            .map(Identity)
            .map_err(|e| CryptoError::EncodingError(e.to_string()))
    }

    /// Decodes the PEM text back into a verifying key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_public_key_pem(&self.0)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Derives the ledger address of this identity
    pub fn address(&self) -> Address {
        Address::from_identity(self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a ledger address (hex SHA-256 of an identity's PEM text)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address of an identity
    pub fn from_identity(identity: &Identity) -> Self {
        Address(hex::encode(message_digest(identity.as_str().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(CryptoError::InvalidAddress(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Address(s.to_ascii_lowercase()))
    }
}

/// Represents a digital signature (lowercase hex of the raw signature bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_bytes()))
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes =
            hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A signing key together with its verifying half.
///
/// Key material never leaves this type except through
/// [`KeyPair::export_secret_key`]; transactions and blocks only ever see the
/// derived [`Identity`] and the resulting [`DigitalSignature`].
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the operating system RNG
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Rebuilds a key pair from its 32 secret bytes
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(KeyPair {
            signing_key: SigningKey::from_bytes(&bytes_array),
        })
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs the SHA-256 digest of `message`
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let signature = self.signing_key.sign(&message_digest(message));
        DigitalSignature::from_signature(&signature)
    }

    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

/// Represents a wallet: a key pair plus the identity and address it owns
#[derive(Debug, Clone)]
pub struct Wallet {
    key_pair: KeyPair,
    identity: Identity,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Result<Self, CryptoError> {
        Self::from_key_pair(KeyPair::generate())
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_key_pair(KeyPair::from_secret_key(secret_key_bytes)?)
    }

    fn from_key_pair(key_pair: KeyPair) -> Result<Self, CryptoError> {
        let identity = Identity::from_public_key(&key_pair.public_key())?;
        let address = identity.address();

        Ok(Wallet {
            key_pair,
            identity,
            address,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Signs a transaction with this wallet's key pair
    pub fn sign_transaction(&self, transaction: &mut Transaction) -> Result<(), TransactionError> {
        transaction.sign(&self.key_pair)
    }

    /// Balance of this wallet's address as recorded on `ledger`
    pub fn get_balance(&self, ledger: &Blockchain) -> f64 {
        ledger.get_balance(&self.address)
    }

    pub fn export_secret_key(&self) -> Vec<u8> {
        self.key_pair.export_secret_key()
    }
}

/// Verifies a signature over the SHA-256 digest of `message`
///
/// A well-formed signature that does not match yields `Ok(false)`; only
/// undecodable signature bytes produce an error.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;

    match public_key.verify(&message_digest(message), &signature) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}
