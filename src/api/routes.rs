use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/blockchain", web::get().to(handlers::get_blockchain))
            .route("/blockchain/last", web::get().to(handlers::get_last_block))
            .route("/block", web::post().to(handlers::submit_block))
            .route("/transaction", web::post().to(handlers::submit_transaction))
            .route("/peer", web::post().to(handlers::greet_peer))
            .route("/accounts/{address}", web::get().to(handlers::get_account)),
    );
}
