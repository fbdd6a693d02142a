pub mod catalog;
pub mod clock;
pub mod error;
pub mod feed;
pub mod journal;
pub mod memory;
pub mod moderation;
pub mod notifier;
pub mod store;
pub mod submission;
pub mod traffic;
pub mod types;

pub use catalog::*;
pub use clock::*;
pub use error::*;
pub use feed::*;
pub use journal::*;
pub use memory::*;
pub use moderation::*;
pub use notifier::*;
pub use store::*;
pub use submission::*;
pub use traffic::*;
pub use types::*;
