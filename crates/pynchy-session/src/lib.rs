//! Container session manager (§4.2): owns the lifetime of every
//! in-container agent, keyed by workspace folder, and exposes a
//! query-level interface (`cold_start`/`send_message`/`wait_done`) that is
//! correct across cold starts, warm messages, and unexpected container
//! death.

pub mod error;
pub mod manager;
pub mod session;
pub mod truncate;
pub mod types;

pub use error::{Result, SessionError};
pub use manager::{outcome_to_result, Mount, SessionManager};
pub use session::ContainerSession;
pub use types::{effective_query_timeout_ms, message_container_name, one_shot_container_name, QueryOutcome, SessionState};
