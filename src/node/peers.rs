use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::blockchain::{Block, Transaction};

/// Upper bound for a whole request to a peer, response included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Peer responded with status {0}")]
    Rejected(u16),
}

/// Body of a greeting sent to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeerGreeting {
    /// Address the greeting node can be reached at
    #[serde(rename = "peerAddress")]
    pub peer_address: String,
}

/// Known peer nodes and the HTTP client used to reach them
#[derive(Debug)]
pub struct Peers {
    hosts: RwLock<HashSet<String>>,
    advertised_host: String,
    client: reqwest::Client,
}

impl Peers {
    pub fn new(advertised_host: String) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Peers {
            hosts: RwLock::new(HashSet::new()),
            advertised_host,
            client,
        })
    }

    /// Remembers a peer. Returns `false` for known peers and for this node itself.
    pub fn register(&self, address: String) -> bool {
        if address.is_empty() || address == self.advertised_host {
            return false;
        }
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Introduces this node to `address` and registers it once it answers
    pub async fn greet(&self, address: &str) -> Result<(), PeerError> {
        let greeting = PeerGreeting {
            peer_address: self.advertised_host.clone(),
        };
        let response = self
            .client
            .post(api_url(address, "/peer"))
            .json(&greeting)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PeerError::Rejected(response.status().as_u16()));
        }
        self.register(address.to_string());
        Ok(())
    }

    /// Downloads the full chain of a peer
    pub async fn fetch_blocks(&self, address: &str) -> Result<Vec<Block>, PeerError> {
        let response = self
            .client
            .get(api_url(address, "/blockchain"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PeerError::Rejected(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Sends the block to every known peer
    pub async fn broadcast_block(&self, block: &Block) {
        let hosts = self.hosts();
        let sends = hosts.iter().map(|host| self.post(host, "/block", block));
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        if !hosts.is_empty() {
            info!("Broadcast block {} to {}/{} peers", block.number, delivered, hosts.len());
        }
    }

    /// Sends the transaction to every known peer
    pub async fn broadcast_transaction(&self, transaction: &Transaction) {
        let hosts = self.hosts();
        join_all(hosts.iter().map(|host| self.post(host, "/transaction", transaction))).await;
    }

    async fn post<T: Serialize>(&self, host: &str, resource: &str, body: &T) -> bool {
        let result = self
            .client
            .post(api_url(host, resource))
            .json(body)
            .send()
            .await
            .map_err(PeerError::from)
            .and_then(|response| match response.status() {
                status if status.is_success() => Ok(()),
                status => Err(PeerError::Rejected(status.as_u16())),
            });
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to send {} to {}: {}", resource, host, err);
                false
            }
        }
    }
}

fn api_url(host: &str, resource: &str) -> String {
    format!("http://{}/api/v1{}", host, resource)
}
