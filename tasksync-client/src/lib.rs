pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod events;
pub mod http_remote;
pub mod memory;
pub mod queries;
pub mod remote;
pub mod store;
pub mod subscription;
pub mod ui_state;
pub mod view;

pub use config::{ClientConfig, ReconnectPolicy};
pub use database::TaskCache;
pub use engine::{FetchMark, OpenFlag, ReconcileEngine, Reconciliation};
pub use errors::{ClientError, ClientResult};
pub use events::{EventDispatcher, ListenerGuard, Operation, SyncEvent};
pub use http_remote::HttpRemote;
pub use memory::MemoryRemote;
pub use remote::{ChangeFeed, RemoteSync};
pub use store::{LocalStore, TaskSnapshot};
pub use subscription::{subscribe_to_changes, ChangeHandler, FeedUpdate, Subscription};
pub use ui_state::{TaskOrder, TaskUiState};
pub use view::{TaskSyncBuilder, TaskView};
