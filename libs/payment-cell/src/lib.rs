pub mod gateway;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use gateway::VnPayGateway;
pub use models::*;
pub use services::*;
