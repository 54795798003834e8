pub mod fetcher;
pub mod policy;
pub mod service;
pub mod store;
pub mod terminal;
