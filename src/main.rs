mod db;
mod endpoint_pool;
mod error;
mod handlers;
mod history;
mod image_store;
mod ledger;
mod models;
mod payment;
mod purchase;
mod reservation;
mod settings;
mod wallet;

use std::{str::FromStr, sync::Arc, time::Duration};

use actix_web::{web, App, HttpServer};
use db::Database;
use endpoint_pool::EndpointPool;
use history::HistoryStore;
use image_store::ImageStore;
use ledger::LedgerRpc;
use log::info;
use payment::{PaymentConfig, PaymentProcessor};
use purchase::PurchaseService;
use reservation::ReservationStore;
use settings::Settings;
use solana_sdk::{pubkey::Pubkey, signature::read_keypair_file};
use wallet::KeypairSigner;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let settings = Settings::load().expect("Failed to load settings");
    info!("Starting solgrid node on {}", settings.bind_addr);

    // Storage
    let database = Arc::new(Database::new(&settings.db_path).expect("Failed to initialize RocksDB"));
    let reservations =
        Arc::new(ReservationStore::open(database.clone()).expect("Failed to load reservations"));
    let attempt_history = Arc::new(HistoryStore::new(database.clone()));
    let images = Arc::new(ImageStore::new(database.clone()));

    // Ledger access: one pool and one connection per process, passed down.
    let pool = Arc::new(EndpointPool::new(settings.rpc_endpoints.clone()));
    info!("Using {} redundant RPC endpoint(s)", pool.len());
    let ledger = Arc::new(LedgerRpc::new(
        pool,
        Duration::from_secs(settings.rpc_timeout_secs),
        Duration::from_millis(settings.confirm_poll_ms),
    ));

    let payer = Arc::new(
        read_keypair_file(&settings.keypair_path).expect("Failed to read payer keypair"),
    );
    let treasury = Pubkey::from_str(&settings.treasury).expect("Invalid treasury address");
    let payments = PaymentProcessor::new(
        ledger,
        Arc::new(KeypairSigner::new(payer)),
        treasury,
        PaymentConfig {
            max_attempts: settings.max_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        },
    );

    let service = Arc::new(PurchaseService::new(
        payments,
        reservations,
        attempt_history,
        settings.price_per_pixel_sol,
    ));
    info!("Payer wallet: {}", service.payer_address());

    let bind_addr = settings.bind_addr.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(service.clone()))
            .app_data(web::Data::new(images.clone()))
            .service(
                web::scope("/api")
                    .route("/purchase", web::post().to(handlers::purchase))
                    .route("/quote", web::get().to(handlers::quote))
                    .route("/grid", web::get().to(handlers::grid))
                    .route("/history", web::get().to(handlers::history))
                    .route("/images", web::post().to(handlers::upload_image))
                    .route("/images/{reference}", web::get().to(handlers::get_image))
                    .route("/reservations/{id}/art", web::put().to(handlers::update_art)),
            )
    })
    .bind(bind_addr)?
    .run()
    .await
}
