pub mod config;
pub mod context;
pub mod engine;
pub mod gateway;
pub mod normalizer;
pub mod polling;
pub mod preview_cache;
pub mod realtime;
pub mod reconciler;
pub mod scheduler;
pub mod status;
pub mod unread;

pub use config::{load_settings, EngineSettings};
pub use context::SessionContext;
pub use engine::{EngineEvent, SyncEngine};
pub use reconciler::ConversationState;
