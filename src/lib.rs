pub mod access;
pub mod aggregate;
pub mod catalog;
pub mod convert;
pub mod error;
pub mod fallback;
pub mod model;
pub mod negotiate;
pub mod node_link;
pub mod refresh;
pub mod serve;
pub mod source_fetch;
pub mod store;
