pub mod definition;
pub mod error;
pub mod store;
pub mod template;
pub mod watcher;

pub use definition::{
    CacheDirective, KeyDirective, KeyStrategy, NamedStatement, StatementBody, StatementDefinition, TreeShape,
};
pub use error::{ParseError, StoreError, WatchError};
pub use store::{ScanReport, StatementStore};
pub use template::SqlTemplate;
pub use watcher::{DefinitionWatcher, RescanHandle, WatchEvent};
