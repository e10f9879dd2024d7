//! Data models for the SpaceY portal.
//!
//! Field names serialize as camelCase to match the web client.

mod machine;
mod news;
mod page;
mod sensor;
mod ticket;
mod usage;
mod user;

pub use machine::*;
pub use news::*;
pub use page::*;
pub use sensor::*;
pub use ticket::*;
pub use usage::*;
pub use user::*;
