//! Client for the TeamSL league website (basketball-bund.net).
//!
//! The site has no single coherent API: competition data comes as versioned
//! JSON envelopes, the league directory as a capped JSON search, and club
//! lookups only through cookie-backed HTML forms with manual paging. Each of
//! those lives behind an [`adapters::Adapter`].

pub mod adapters;
pub mod builder;
pub mod errors;
pub mod html;
pub mod json;
pub mod models;
pub mod raw;
pub mod session;
pub mod transport;

pub use adapters::{AdapterKind, AdapterRequest};
pub use errors::{ErrorKind, UpstreamError};

pub const DEFAULT_BASE_URL: &str = "https://www.basketball-bund.net";

/// Rows per page on the legacy result pages; `startrow` advances by this.
pub const PAGE_SIZE: u32 = 10;
