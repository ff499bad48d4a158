//! Request/response plumbing shared by the network transport, the response
//! cache and the remote gateway.

#[cfg(test)]
pub mod mock;
mod transport;
mod types;

pub use transport::HttpTransport;
pub use types::{Fetch, FetchError, Request, Response, ResponseSource, ResponseType};
