pub mod association;
pub mod audit;
pub mod lifecycle;
pub mod notify;
