pub mod connection;
pub mod error;
pub mod identity;
pub mod notify;
pub mod registry;
pub mod service;

pub use error::ChatError;
pub use identity::{Identity, IdentityProvider, JwtIdentity};
pub use notify::{DbNotifier, Notifier};
pub use registry::GroupRegistry;
pub use service::ChatService;
