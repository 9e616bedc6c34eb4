use actix_web::{web, HttpResponse, Responder};
use log::{debug, warn};
use tokio::sync::mpsc::error::TrySendError;

use crate::blockchain::{Account, Address, Block, BlockchainError, Transaction};
use crate::events::Event;
use crate::node::{NodeState, PeerGreeting};

/// Data structure for the node state
pub type NodeData = web::Data<NodeState>;

fn error_response(mut builder: actix_web::HttpResponseBuilder, message: String) -> HttpResponse {
    builder.json(serde_json::json!({ "error": message }))
}

/// Get the full blockchain
///
/// Returns every block, genesis first
#[utoipa::path(
    get,
    path = "/api/v1/blockchain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = Vec<Block>)
    )
)]
pub async fn get_blockchain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.cache.blocks())
}

/// Get the chain tip
#[utoipa::path(
    get,
    path = "/api/v1/blockchain/last",
    responses(
        (status = 200, description = "Last block retrieved successfully", body = Block),
        (status = 404, description = "No blocks cached yet")
    )
)]
pub async fn get_last_block(node: NodeData) -> impl Responder {
    match node.cache.last_block() {
        Some(block) => HttpResponse::Ok().json(block),
        None => error_response(HttpResponse::NotFound(), "No blocks available".to_string()),
    }
}

/// Submit a block mined by another node
///
/// The block competes with the block this node is currently mining
#[utoipa::path(
    post,
    path = "/api/v1/block",
    request_body = Block,
    responses(
        (status = 202, description = "Block queued for validation"),
        (status = 400, description = "Block is not valid JSON"),
        (status = 503, description = "Block queue is full")
    )
)]
pub async fn submit_block(node: NodeData, block: web::Json<Block>) -> impl Responder {
    let block = block.into_inner();
    debug!("Received block {} from a peer", block.number);

    match node.blocks.submit(block) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(err @ BlockchainError::QueueFull) => {
            warn!("Dropping peer block: {}", err);
            error_response(HttpResponse::ServiceUnavailable(), err.to_string())
        }
        Err(err) => error_response(HttpResponse::InternalServerError(), err.to_string()),
    }
}

/// Submit a signed transaction
///
/// The transaction is pooled and mined once it applies to the ledger
#[utoipa::path(
    post,
    path = "/api/v1/transaction",
    request_body = Transaction,
    responses(
        (status = 202, description = "Transaction queued"),
        (status = 400, description = "Invalid transaction"),
        (status = 503, description = "Transaction queue is full")
    )
)]
pub async fn submit_transaction(
    node: NodeData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    let transaction = transaction.into_inner();

    if transaction.sender.is_none() {
        return error_response(
            HttpResponse::BadRequest(),
            "Coinbase transactions cannot be submitted".to_string(),
        );
    }
    if !transaction.valid_signature() {
        return error_response(HttpResponse::BadRequest(), "Invalid signature".to_string());
    }

    match node.transactions.try_send(transaction) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(TrySendError::Full(_)) => error_response(
            HttpResponse::ServiceUnavailable(),
            "Transaction queue is full".to_string(),
        ),
        Err(TrySendError::Closed(_)) => error_response(
            HttpResponse::InternalServerError(),
            "Node is shutting down".to_string(),
        ),
    }
}

/// Greet this node
///
/// Registers the sender as a peer that receives new blocks
#[utoipa::path(
    post,
    path = "/api/v1/peer",
    request_body = PeerGreeting,
    responses(
        (status = 200, description = "Peer registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn greet_peer(node: NodeData, greeting: web::Json<PeerGreeting>) -> impl Responder {
    let address = greeting.into_inner().peer_address;

    match node.events.send(Event::NewPeer(address.clone())) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Hello {}", address)
        })),
        Err(_) => error_response(
            HttpResponse::InternalServerError(),
            "Node is shutting down".to_string(),
        ),
    }
}

/// Get an account
///
/// Returns the balance and nonce of an address
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{address}",
    responses(
        (status = 200, description = "Account retrieved successfully", body = Account),
        (status = 400, description = "Not a valid address"),
        (status = 404, description = "Account has never received coins")
    )
)]
pub async fn get_account(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address: Address = match address.parse() {
        Ok(address) => address,
        Err(err) => return error_response(HttpResponse::BadRequest(), err.to_string()),
    };

    match node.cache.account(&address) {
        Some(account) => HttpResponse::Ok().json(account),
        None => error_response(
            HttpResponse::NotFound(),
            format!("Account {} not found", address),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::block::meets_difficulty;
    use crate::blockchain::{Blockchain, Wallet, COINBASE_REWARD};
    use crate::node::BlockCache;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, Receiver, UnboundedReceiver};

    const TEST_DIFFICULTY: u32 = 8;

    struct Harness {
        chain: Blockchain,
        state: NodeState,
        transactions: Receiver<Transaction>,
        events: UnboundedReceiver<Event>,
    }

    fn harness() -> Harness {
        let chain = Blockchain::with_difficulty(Wallet::new().unwrap(), TEST_DIFFICULTY);
        let (events, event_receiver) = mpsc::unbounded_channel();
        let (transactions, transaction_receiver) = mpsc::channel(4);
        let state = NodeState {
            cache: Arc::new(BlockCache::new(chain.blocks())),
            blocks: chain.block_submitter(),
            transactions,
            events,
        };
        Harness {
            chain,
            state,
            transactions: transaction_receiver,
            events: event_receiver,
        }
    }

    fn mined_on_genesis(miner: &Wallet) -> Block {
        let mut block = Block::new(
            1,
            Block::genesis().hash,
            vec![Transaction::coinbase_to(miner.address().clone())],
            0,
        );
        while !meets_difficulty(&block.hash, TEST_DIFFICULTY) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        block
    }

    #[actix_web::test]
    async fn test_get_blockchain() {
        let harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::get().uri("/api/v1/blockchain").to_request();
        let blocks: Vec<Block> = test::call_and_read_body_json(&app, request).await;

        assert_eq!(blocks, vec![Block::genesis()]);

        let request = test::TestRequest::get().uri("/api/v1/blockchain/last").to_request();
        let tip: Block = test::call_and_read_body_json(&app, request).await;

        assert_eq!(tip, Block::genesis());
    }

    #[actix_web::test]
    async fn test_submitted_block_reaches_the_miner() {
        let mut harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;
        let block = mined_on_genesis(&Wallet::new().unwrap());

        let request = test::TestRequest::post()
            .uri("/api/v1/block")
            .set_json(&block)
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let tip = harness.chain.mine_block().unwrap();
        assert_eq!(tip, block);
    }

    #[actix_web::test]
    async fn test_malformed_block_is_rejected() {
        let harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/api/v1/block")
            .set_payload("not a block")
            .insert_header(("content-type", "application/json"))
            .to_request();
        let response = test::call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_submit_transaction() {
        let mut harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let mut transaction =
            Transaction::new(sender.address().clone(), receiver.address().clone(), 3, 1);
        transaction.sign(&sender).unwrap();

        let request = test::TestRequest::post()
            .uri("/api/v1/transaction")
            .set_json(&transaction)
            .to_request();
        let response = test::call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(harness.transactions.try_recv().unwrap(), transaction);
    }

    #[actix_web::test]
    async fn test_invalid_transactions_are_rejected() {
        let mut harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let mut forged =
            Transaction::new(sender.address().clone(), receiver.address().clone(), 3, 1);
        forged.sign(&sender).unwrap();
        forged.amount = 300;
        let coinbase = Transaction::coinbase_to(receiver.address().clone());

        for transaction in [forged, coinbase] {
            let request = test::TestRequest::post()
                .uri("/api/v1/transaction")
                .set_json(&transaction)
                .to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(harness.transactions.try_recv().is_err());
    }

    #[actix_web::test]
    async fn test_greet_peer() {
        let mut harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/api/v1/peer")
            .set_json(serde_json::json!({ "peerAddress": "node-b:8000" }))
            .to_request();
        let response = test::call_service(&app, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            harness.events.try_recv().unwrap(),
            Event::NewPeer("node-b:8000".to_string())
        );
    }

    #[actix_web::test]
    async fn test_get_account() {
        let harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;
        let miner = Wallet::new().unwrap();

        let request = test::TestRequest::get()
            .uri(&format!("/api/v1/accounts/{}", miner.address()))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        harness.state.cache.add_block(mined_on_genesis(&miner));

        let request = test::TestRequest::get()
            .uri(&format!("/api/v1/accounts/{}", miner.address()))
            .to_request();
        let account: Account = test::call_and_read_body_json(&app, request).await;
        assert_eq!(account.balance, COINBASE_REWARD);
        assert_eq!(account.nonce, 0);
    }

    #[actix_web::test]
    async fn test_get_account_rejects_malformed_address() {
        let harness = harness();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(configure_routes),
        )
        .await;

        for address in ["0OIl", "3mJr7AoUXx2Wqd"] {
            let request = test::TestRequest::get()
                .uri(&format!("/api/v1/accounts/{}", address))
                .to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
