pub mod access;
pub mod error;
mod events;
pub mod extract;
pub mod http;
pub mod middleware;
mod parse;
mod participants;
pub mod resolver;
mod users;

pub use access::Caller;
pub use error::{ApiError, ApiResult};
pub use resolver::{RequestContext, Resolver};
