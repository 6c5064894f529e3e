//! Persistent storage for jetfinder
//!
//! The engine talks to storage through three narrow traits so tests and
//! embedders can swap the backing store:
//! - [`KeyValueStorage`]: registration flag, winner name, cookie header
//! - [`CookieJar`]: cookies seen from the backend and the ban list
//! - [`CollectedSpotsStore`]: spots collected across sessions
//!
//! [`Store`] implements all three on top of SQLite.

pub mod schema;
mod store;

pub use store::Store;

use crate::error::Result;

/// Simple typed settings
pub trait KeyValueStorage: Send + Sync {
    fn is_user_registered(&self) -> Result<bool>;
    fn set_user_registered(&self, registered: bool) -> Result<()>;

    fn winner_name(&self) -> Result<Option<String>>;
    fn set_winner_name(&self, name: &str) -> Result<()>;

    /// Cookie header value sent with backend requests
    fn cookies(&self) -> Result<Option<String>>;
    /// Store or clear (`None`) the cookie header value
    fn set_cookies(&self, cookies: Option<&str>) -> Result<()>;
}

/// Tracks session cookies issued by the backend
pub trait CookieJar: Send + Sync {
    /// Most recently seen cookie, or `None` once that cookie is banned
    fn last_cookie(&self) -> Result<Option<String>>;

    /// Record a cookie from a response.
    ///
    /// Returns false (and stores nothing) when the cookie was banned.
    fn store_cookie(&self, cookie: &str) -> Result<bool>;

    /// Ban the most recently seen cookie so it is never sent again
    fn ban_cookie(&self) -> Result<()>;
}

/// Spots collected so far, in collection order
pub trait CollectedSpotsStore: Send + Sync {
    fn collected_spot_ids(&self) -> Result<Vec<i64>>;
    fn set_collected_spot_ids(&self, ids: &[i64]) -> Result<()>;
}
