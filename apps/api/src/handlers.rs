pub mod health;
pub mod rate_limit;
