use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use powcoin::api;
use powcoin::blockchain::{self, Wallet};
use powcoin::config::Config;
use powcoin::node::{self, Node};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_blockchain,
        api::handlers::get_last_block,
        api::handlers::submit_block,
        api::handlers::submit_transaction,
        api::handlers::greet_peer,
        api::handlers::get_account
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Account,
            blockchain::Address,
            blockchain::DigitalSignature,
            node::PeerGreeting
        )
    ),
    tags(
        (name = "node", description = "Proof of work node endpoints")
    ),
    info(
        title = "powcoin node API",
        version = "0.1.0",
        description = "Chain, block propagation and transaction submission",
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

    let config = Config::from_env();
    let wallet = Wallet::load_or_generate(&config.key_path)
        .with_context(|| format!("Failed to load miner key from {}", config.key_path.display()))?;
    info!("Loaded miner key for {}", wallet.address());

    let bind_host = config.bind_host.clone();
    let state = web::Data::new(
        Node::new(config, wallet)
            .start()
            .await
            .context("Failed to start node")?,
    );

    info!("Starting HTTP server at http://{}", bind_host);

    HttpServer::new(move || {
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
    .bind(bind_host.as_str())?
    .run()
    .await?;

    Ok(())
}
