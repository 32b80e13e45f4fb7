//! Gateway that lets a browser front end embed third-party pages, search the
//! web and translate text through a single origin.

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod limits;
pub mod proxy;
pub mod rate_limit;
pub mod search;
pub mod translate;
pub mod upstream;
pub mod validator;

pub use api::{router, AppState};
pub use config::Config;
pub use error::GatewayError;
