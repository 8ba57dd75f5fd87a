pub mod alerts;
pub mod app;
pub mod catalog;
pub mod error;
pub mod favorites;
pub mod media;
pub mod pager;
pub mod session;
pub mod store;
