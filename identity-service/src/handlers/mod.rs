pub mod audit;
pub mod consent;
pub mod contexts;
pub mod metrics;
pub mod oauth;
pub mod profiles;
pub mod resolve;
