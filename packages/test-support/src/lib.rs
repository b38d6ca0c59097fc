//! Test support utilities shared by the workspace's test suites.
//!
//! Provides one-shot logging initialisation, unique names for test isolation,
//! and scratch directories holding migration fixtures.

pub mod fixtures;
pub mod logging;

use ulid::Ulid;

/// Generate a unique string with the given prefix
///
/// # Examples
/// ```
/// use test_support::unique_str;
///
/// let id1 = unique_str("db");
/// let id2 = unique_str("db");
/// assert_ne!(id1, id2);
/// assert!(id1.starts_with("db-"));
/// ```
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}
