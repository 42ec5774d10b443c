use std::sync::{Mutex, MutexGuard};

use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{
    Address, Block, Blockchain, Identity, LedgerError, LedgerStore, MiningControl, Rejection,
    StorageError, Transaction, Wallet,
};

/// Errors raised while serving a request
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Ledger changed in memory but could not be saved: {0}")]
    Storage(#[from] StorageError),
}

/// Shared service state: one ledger behind one lock, plus optional storage.
///
/// The ledger lock is only held for short reads and updates. Proof of work
/// runs on a prepared candidate with the lock released, and the `mining`
/// lock keeps a single miner at a time.
pub struct AppState {
    ledger: Mutex<Blockchain>,
    mining: Mutex<()>,
    store: Option<LedgerStore>,
}

impl AppState {
    pub fn new(blockchain: Blockchain, store: Option<LedgerStore>) -> Self {
        AppState {
            ledger: Mutex::new(blockchain),
            mining: Mutex::new(()),
            store,
        }
    }

    /// Locks the ledger; a panic in another request does not wedge the service
    pub fn ledger(&self) -> MutexGuard<'_, Blockchain> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits a transaction and saves the result
    pub fn admit(&self, transaction: Transaction) -> Result<u64, ServiceError> {
        let mut ledger = self.ledger();
        ledger.add_transaction(transaction).map_err(LedgerError::from)?;
        self.persist(&ledger)?;

        Ok(ledger.chain().len() as u64)
    }

    /// Mines the mempool for `miner` with the configured timeout
    pub fn mine(&self, miner: &Identity) -> Result<Block, ServiceError> {
        let control = self.ledger().mining_control();
        self.mine_with(miner, &control)
    }

    /// Mines the mempool for `miner`, holding the ledger lock only to
    /// prepare and to commit the block
    pub fn mine_with(
        &self,
        miner: &Identity,
        control: &MiningControl,
    ) -> Result<Block, ServiceError> {
        let _mining = self.mining.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut candidate = self.ledger().prepare_block(miner)?;

        if let Err(err) = candidate.mine_with(control) {
            self.ledger().abandon_block(&candidate);
            return Err(LedgerError::from(err).into());
        }

        let mut ledger = self.ledger();
        let block = ledger.commit_block(candidate)?;
        self.persist(&ledger)?;

        Ok(block)
    }

    fn persist(&self, blockchain: &Blockchain) -> Result<(), StorageError> {
        match &self.store {
            Some(store) => store.save(blockchain).map_err(|err| {
                error!("Failed to save blockchain: {}", err);
                err
            }),
            None => Ok(()),
        }
    }
}

/// Data structure for the blockchain state
pub type LedgerData = web::Data<AppState>;

fn rejection_response(rejection: &Rejection) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": rejection.to_string()
    }))
}

fn service_error_response(err: &ServiceError) -> HttpResponse {
    match err {
        ServiceError::Ledger(LedgerError::Rejected(rejection)) => rejection_response(rejection),
        err => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": err.to_string()
        })),
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's identity (PEM public key)
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key (hex, used for signing)
    pub private_key: String,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's identity (PEM public key)
    pub miner: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,

    /// First problem found, if any
    pub reason: Option<String>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's identity (PEM public key)
    pub identity: String,

    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: LedgerData) -> impl Responder {
    let ledger = state.ledger();
    let chain = ledger.chain().to_vec();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid: ledger.is_chain_valid(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(state: LedgerData) -> impl Responder {
    let transactions = state.ledger().mempool().to_vec();
    HttpResponse::Ok().json(transactions)
}

/// Create a new transaction
///
/// Signs a transfer with the supplied private key and adds it to the mempool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid or rejected transaction"),
        (status = 500, description = "Ledger could not be saved")
    )
)]
pub async fn new_transaction(
    state: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let private_key_bytes = match hex::decode(&transaction_req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid private key format. Must be a hex string."
            }));
        }
    };

    let wallet = match Wallet::from_secret_key(&private_key_bytes) {
        Ok(wallet) => wallet,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid private key: {}", err)
            }));
        }
    };

    let mut transaction = Transaction::new(
        wallet.identity().clone(),
        Identity(transaction_req.recipient.clone()),
        transaction_req.amount,
    );

    if let Err(err) = wallet.sign_transaction(&mut transaction) {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Failed to sign transaction: {}", err)
        }));
    }

    admit(&state, transaction)
}

/// Submit a signed transaction
///
/// Adds a transaction that was signed by the client to the mempool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/submit",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Transaction rejected"),
        (status = 500, description = "Ledger could not be saved")
    )
)]
pub async fn submit_transaction(
    state: LedgerData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    let transaction = transaction.into_inner();

    // Rewards only enter the mempool through mining
    if transaction.is_reward() {
        return rejection_response(&Rejection::ReservedSender);
    }

    admit(&state, transaction)
}

fn admit(state: &LedgerData, transaction: Transaction) -> HttpResponse {
    match state.admit(transaction) {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction added to mempool".to_string(),
            block_index,
        }),
        Err(err) => service_error_response(&err),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions and a reward for the miner
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Nothing to mine"),
        (status = 500, description = "Mining failed or the ledger could not be saved")
    )
)]
pub async fn mine_block(state: LedgerData, mine_req: web::Json<MineRequest>) -> impl Responder {
    let miner = Identity(mine_req.into_inner().miner);
    let state = state.clone();

    // Proof of work is CPU bound; keep it off the async workers
    let result = web::block(move || state.mine(&miner)).await;

    match result {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Mining task failed: {}", err)
        })),
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(state: LedgerData) -> impl Responder {
    let response = match state.ledger().validate_chain() {
        Ok(()) => ValidationResponse {
            is_valid: true,
            reason: None,
        },
        Err(violation) => ValidationResponse {
            is_valid: false,
            reason: Some(violation.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet() -> impl Responder {
    match Wallet::new() {
        Ok(wallet) => HttpResponse::Created().json(WalletResponse {
            identity: wallet.identity().0.clone(),
            address: wallet.address().0.clone(),
            private_key: hex::encode(wallet.export_secret_key()),
        }),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to create wallet: {}", err)
        })),
    }
}

/// Get wallet balance
///
/// Returns the mined balance of an address
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Hex SHA-256 address of the wallet")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_wallet_balance(state: LedgerData, address: web::Path<String>) -> impl Responder {
    let address: Address = match address.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": err.to_string()
            }));
        }
    };

    let balance = state.ledger().get_balance(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}
