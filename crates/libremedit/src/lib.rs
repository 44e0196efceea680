pub mod bridge;
pub mod broker;
pub mod cache_root;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod hook;
pub mod host;
pub mod lifecycle;
pub mod manager;
pub mod mappings;
pub mod registry;

pub use bridge::{EventBridge, HookSubscription};
pub use broker::EventBroker;
pub use cache_root::CacheRoot;
pub use config::RemoteFileConfig;
pub use error::RemoteFileError;
pub use fetcher::RemoteFileFetcher;
pub use hook::{EditTarget, HookShape};
pub use host::{CommandExecutor, EditorOperations, EventSource, HostError};
pub use lifecycle::LifecycleCoordinator;
pub use manager::{Collaborators, RemoteFileManager};
pub use mappings::PathMappingTable;
pub use registry::SessionRegistry;
