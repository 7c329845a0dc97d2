//! Replay server subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout and trace layers)
//!     → request.rs (incoming request → Exchange)
//!     → matching (consume recorded entry, verdict)
//!     → response.rs (recorded response → wire response, cookie.rs for Set-Cookie)
//!     → Send to client, archive, flush report
//! ```

pub mod cookie;
pub mod request;
pub mod response;
pub mod server;

pub use cookie::SetCookie;
pub use server::{AppState, ReplayServer};
