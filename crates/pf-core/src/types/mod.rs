//! Core data types shared by the stream client and the store.
//!
//! Wire-level shapes that are forwarded unchanged to consumers (market
//! definitions, order changes, price/size pairs) derive serde with the
//! feed's camelCase field names; purely domain-side types (events, feed
//! state) do not.

pub mod enums;
pub mod event;
pub mod market;
pub mod order;
pub mod price;
pub mod status;

pub use enums::*;
pub use event::*;
pub use market::*;
pub use order::*;
pub use price::*;
pub use status::*;
