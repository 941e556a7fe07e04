// homeconnect-api: Async Rust client engine for the Home Connect cloud API
// (transport, retry/rate limiting, OAuth2, server-sent events)

pub mod auth;
pub mod error;
pub mod retry;
pub mod sse;
pub mod transport;

pub use auth::{
    AbsoluteToken, AuthConfig, AuthFlow, AuthGate, AuthState, AuthStatus, Authoriser,
    JsonFileTokenStore, MemoryTokenStore, TokenStore,
};
pub use error::{Error, ErrorBody, EventStreamError};
pub use retry::{DefaultHooks, RateLimitClock, Requester, RetryConfig, RetryHooks};
pub use sse::{EventStream, SseParser, SseRecord};
pub use transport::{BodyValidator, Endpoint, Request, Transport, TransportConfig};
