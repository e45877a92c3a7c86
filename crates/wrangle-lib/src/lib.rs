//! Operation compiler, engine adapters, transformation history and
//! relational chains for wrangle.
//!
//! One vocabulary of operations compiles to polars `DataFrame` steps, a
//! polars `LazyFrame` plan or SQL text. [`Session`] ties compilation and
//! execution to named datasets with undo, reset and replay.

pub mod chain;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_display;
pub mod expr;
pub mod history;
pub mod logging;
pub mod operation;
pub mod query;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod store;

pub use chain::{ChainState, ChainStep};
pub use compile::{compile, CompileContext, Fragment};
pub use config::{AppConfig, ConfigManager};
pub use engine::{Engine, ExecutionLimits, ResultDescriptor};
pub use error::{ErrorKind, ErrorReport, FieldError, Result, WrangleError};
pub use history::{Applied, History, HistoryEntry, HistoryState};
pub use operation::{Operation, OperationKind};
pub use session::{ReplayReport, ResultView, Session, SessionOptions};
pub use snapshot::{ColumnInfo, SemanticType, Snapshot, SnapshotDescription};
pub use store::{MemoryStore, SnapshotStore};

/// Name used for the config directory and log targets.
pub const APP_NAME: &str = "wrangle";
