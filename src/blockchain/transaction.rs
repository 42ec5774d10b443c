use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::canonical::to_canonical_bytes;
use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Identity, KeyPair};

/// Reserved sender identity of mining rewards
pub const NETWORK_SENDER: &str = "Network";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Where a transaction's value comes from.
///
/// Rewards are minted by the ledger itself and carry no signature; every
/// other transfer is debited from an account identity and must be signed by
/// it. On the wire the variant is the plain sender string, with
/// [`NETWORK_SENDER`] standing for [`Sender::Network`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Network,
    Account(Identity),
}

impl Sender {
    pub fn as_str(&self) -> &str {
        match self {
            Sender::Network => NETWORK_SENDER,
            Sender::Account(identity) => identity.as_str(),
        }
    }

    /// The account identity, if this is not a reward
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Sender::Network => None,
            Sender::Account(identity) => Some(identity),
        }
    }
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        if value == NETWORK_SENDER {
            Sender::Network
        } else {
            Sender::Account(Identity(value))
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Network => NETWORK_SENDER.to_string(),
            Sender::Account(identity) => identity.0,
        }
    }
}

/// Represents a value transfer recorded on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender identity (PEM public key), or "Network" for mining rewards
    #[schema(value_type = String)]
    pub sender: Sender,

    /// Recipient identity (PEM public key)
    #[schema(value_type = String)]
    pub recipient: Identity,

    /// Amount being transferred
    pub amount: f64,

    /// Hex signature over the canonical `{amount, recipient, sender}` payload
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transfer between two identities
    pub fn new(sender: Identity, recipient: Identity, amount: f64) -> Self {
        Transaction {
            sender: Sender::Account(sender),
            recipient,
            amount,
            signature: None,
        }
    }

    /// Creates a mining reward paid by the network
    pub fn reward(recipient: Identity, amount: f64) -> Self {
        Transaction {
            sender: Sender::Network,
            recipient,
            amount,
            signature: None,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self.sender, Sender::Network)
    }

    /// Address debited by this transaction; rewards debit nobody
    pub fn sender_address(&self) -> Option<Address> {
        self.sender.identity().map(Identity::address)
    }

    pub fn recipient_address(&self) -> Address {
        self.recipient.address()
    }

    /// Signs the transaction with `key_pair`, replacing any earlier signature.
    ///
    /// The key is not checked against the sender identity: signing with the
    /// wrong key produces a signature that simply fails [`Transaction::verify`].
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), TransactionError> {
        if let Sender::Account(identity) = &self.sender {
            if identity.is_empty() {
                return Err(TransactionError::InvalidState(
                    "transaction has no sender identity".to_string(),
                ));
            }
        }

        self.signature = Some(key_pair.sign(&self.signing_payload()));
        Ok(())
    }

    /// Checks the signature against the key encoded in the sender identity.
    ///
    /// Rewards always verify. Anything malformed (missing signature,
    /// undecodable key or signature bytes) is reported as `false`.
    pub fn verify(&self) -> bool {
        let identity = match &self.sender {
            Sender::Network => return true,
            Sender::Account(identity) => identity,
        };

        let signature = match &self.signature {
            Some(signature) => signature,
            None => return false,
        };

        let public_key = match identity.to_public_key() {
            Ok(key) => key,
            Err(_) => return false,
        };

        verify_signature(&self.signing_payload(), signature, &public_key).unwrap_or(false)
    }

    /// Canonical bytes covered by the signature (signature field excluded)
    pub fn signing_payload(&self) -> Vec<u8> {
        to_canonical_bytes(&json!({
            "sender": self.sender.as_str(),
            "recipient": self.recipient.as_str(),
            "amount": self.amount,
        }))
    }

    /// Full public view of the transaction as it enters a block hash
    pub(crate) fn to_hash_value(&self) -> Value {
        json!({
            "sender": self.sender.as_str(),
            "recipient": self.recipient.as_str(),
            "amount": self.amount,
            "signature": self.signature.as_ref().map(DigitalSignature::as_str),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;

    fn signed_transfer(amount: f64) -> (Wallet, Wallet, Transaction) {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.identity().clone(),
            recipient_wallet.identity().clone(),
            amount,
        );
        sender_wallet.sign_transaction(&mut transaction).unwrap();

        (sender_wallet, recipient_wallet, transaction)
    }

    #[test]
    fn test_new_transaction() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let transaction = Transaction::new(
            sender_wallet.identity().clone(),
            recipient_wallet.identity().clone(),
            10.5,
        );

        assert_eq!(transaction.sender, Sender::Account(sender_wallet.identity().clone()));
        assert_eq!(&transaction.recipient, recipient_wallet.identity());
        assert_eq!(transaction.amount, 10.5);
        assert!(transaction.signature.is_none());
        assert!(!transaction.is_reward());
        assert_eq!(transaction.sender_address().as_ref(), Some(sender_wallet.address()));
    }

    #[test]
    fn test_sign_and_verify() {
        let (_, _, transaction) = signed_transfer(25.0);

        assert!(transaction.signature.is_some());
        assert!(transaction.verify());
    }

    #[test]
    fn test_tampered_amount_fails_verification() {
        let (_, _, mut transaction) = signed_transfer(25.0);

        transaction.amount = 2500.0;
        assert!(!transaction.verify());
    }

    #[test]
    fn test_tampered_recipient_fails_verification() {
        let (_, _, mut transaction) = signed_transfer(25.0);
        let thief = Wallet::new().unwrap();

        transaction.recipient = thief.identity().clone();
        assert!(!transaction.verify());
    }

    #[test]
    fn test_signature_from_wrong_key_is_invalid() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();
        let malicious_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.identity().clone(),
            recipient_wallet.identity().clone(),
            50.0,
        );
        malicious_wallet.sign_transaction(&mut transaction).unwrap();

        assert!(!transaction.verify());
    }

    #[test]
    fn test_missing_signature_is_invalid() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let transaction = Transaction::new(
            sender_wallet.identity().clone(),
            recipient_wallet.identity().clone(),
            15.0,
        );

        assert!(!transaction.verify());
    }

    #[test]
    fn test_malformed_sender_key_is_invalid() {
        let (_, _, mut transaction) = signed_transfer(5.0);

        transaction.sender = Sender::Account(Identity("garbage".to_string()));
        assert!(!transaction.verify());
    }

    #[test]
    fn test_resigning_overwrites_signature() {
        let (sender_wallet, _, mut transaction) = signed_transfer(5.0);
        let other = Wallet::new().unwrap();

        other.sign_transaction(&mut transaction).unwrap();
        assert!(!transaction.verify());

        sender_wallet.sign_transaction(&mut transaction).unwrap();
        assert!(transaction.verify());
    }

    #[test]
    fn test_sign_without_sender_fails() {
        let key_pair = KeyPair::generate();
        let recipient = Wallet::new().unwrap();
        let mut transaction =
            Transaction::new(Identity(String::new()), recipient.identity().clone(), 1.0);

        let result = transaction.sign(&key_pair);
        assert!(matches!(result, Err(TransactionError::InvalidState(_))));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_reward_always_verifies() {
        let miner_wallet = Wallet::new().unwrap();
        let mut transaction = Transaction::reward(miner_wallet.identity().clone(), 50.0);

        assert!(transaction.is_reward());
        assert!(transaction.verify());

        transaction.signature = Some(DigitalSignature("deadbeef".to_string()));
        assert!(transaction.verify());
        assert!(transaction.sender_address().is_none());
    }

    #[test]
    fn test_wire_shape() {
        let miner_wallet = Wallet::new().unwrap();
        let transaction = Transaction::reward(miner_wallet.identity().clone(), 50.0);

        let value = serde_json::to_value(&transaction).unwrap();
        assert_eq!(value["sender"], "Network");
        assert_eq!(value["recipient"], miner_wallet.identity().as_str());
        assert_eq!(value["amount"], 50.0);
        assert!(value["signature"].is_null());

        let parsed: Transaction = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, transaction);
        assert!(parsed.is_reward());
    }

    #[test]
    fn test_signed_transaction_survives_json() {
        let (_, _, transaction) = signed_transfer(12.5);

        let json = serde_json::to_string(&transaction).unwrap();
        let parsed: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, transaction);
        assert!(parsed.verify());
    }
}
