//! Role-based access control and credential handling.
//!
//! Roles are plain string labels attached to users; each role maps to a
//! static set of permission strings. Tokens are opaque keys stored in the
//! database and presented via the `Authorization: Token <key>` header.

pub mod credentials;
pub mod roles;
