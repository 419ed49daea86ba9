pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::StoreError;
pub use manager::StateStore;
pub use types::{
    Chat, ContextMode, CursorDirection, Delivery, HostJob, JidAlias, LedgerEntry, Message,
    PluginVerdict, PluginVerification, RouterState, ScheduleType, ScheduledTask, TaskRun,
    TaskStatus, Workspace,
};
