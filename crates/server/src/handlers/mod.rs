//! HTTP request handlers.

pub mod admin;
pub mod auth;
pub mod captures;
pub mod classifications;
pub mod common;
pub mod fish;
pub mod media;
pub mod uploads;

pub use admin::*;
pub use auth::*;
pub use captures::*;
pub use classifications::*;
pub use fish::*;
pub use media::*;
pub use uploads::*;
