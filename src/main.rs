use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pow_ledger::api::{self, handlers, AppState};
use pow_ledger::blockchain::{self, LedgerStore};
use pow_ledger::config::{self, Config};

// Load the ledger from disk, or bootstrap a new one with a genesis block
fn initialize_blockchain(config: &Config) -> anyhow::Result<AppState> {
    let store = LedgerStore::new(&config.storage.path);

    let blockchain = store
        .load_or_bootstrap(&config.ledger)
        .with_context(|| format!("failed to open ledger at {}", config.storage.path))?;

    info!(
        "Ledger ready: {} blocks, difficulty {}, reward {}",
        blockchain.chain().len(),
        blockchain.difficulty(),
        blockchain.block_reward()
    );

    if !blockchain.is_chain_valid() {
        warn!("Loaded chain does not validate; serving it as-is");
    }

    Ok(AppState::new(blockchain, Some(store)))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::submit_transaction,
        handlers::mine_block,
        handlers::validate_chain,
        handlers::create_wallet,
        handlers::get_wallet_balance
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::LedgerState,
            handlers::ChainResponse,
            handlers::TransactionRequest,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::ValidationResponse,
            handlers::WalletResponse,
            handlers::BalanceResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "0.1.0",
        description = "A single-node proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::load_config().context("failed to load configuration")?;
    let state = web::Data::new(initialize_blockchain(&config)?);

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
