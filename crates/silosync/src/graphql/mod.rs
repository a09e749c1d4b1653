//! GraphQL transport: request execution with retries, and paginated
//! collections on top of it.

mod client;
mod collection;
mod error;

pub use client::{DEFAULT_API_URL, DEFAULT_TIMEOUT, GraphQLClient};
pub use collection::GraphQLCollection;
pub use error::{
    GraphQLError, RATE_LIMIT_MESSAGE_PREFIX, RATE_LIMIT_RESET_HEADER, RequestError,
    is_rate_limit_message, parse_rate_limit_reset,
};
