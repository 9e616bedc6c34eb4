// API module
//
// HTTP boundary of the node. Handlers never touch the chain directly: reads
// come from the block cache, writes go through the node's queues.

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
