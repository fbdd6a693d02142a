pub mod client;
pub mod subscription;

pub use client::*;
pub use subscription::*;
