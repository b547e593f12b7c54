//! Best-effort in-process caches.
//!
//! Same contract as a network cache: every operation can "miss" but never
//! fails the caller. Key shapes mirror the persisted key spaces:
//! `user:<id>`, `thread:<chat>:<user>:<topic>`,
//! `cache:recent_topics:<chat>:<user>`, `messages:<thread_id>`,
//! `files:<thread_id>`, `exec:file:<temp_id>`, `exec:meta:<temp_id>`.

pub mod bytes_cache;
pub mod exec_cache;
pub mod ttl;
pub mod user_cache;
pub mod write_behind;

pub use bytes_cache::BytesCache;
pub use exec_cache::ExecCache;
pub use ttl::TtlMap;
pub use user_cache::UserCache;
pub use write_behind::ToolCallWriter;

use std::time::Duration;

pub const USER_TTL: Duration = Duration::from_secs(5 * 60);
pub const THREAD_TTL: Duration = Duration::from_secs(5 * 60);
pub const RECENT_TOPICS_TTL: Duration = Duration::from_secs(60);
pub const MESSAGE_WINDOW_TTL: Duration = Duration::from_secs(5 * 60);
pub const FILE_LIST_TTL: Duration = Duration::from_secs(5 * 60);

pub fn user_key(user_id: i64) -> String {
    format!("user:{user_id}")
}

pub fn thread_key(chat_id: i64, user_id: i64, topic_id: i64) -> String {
    format!("thread:{chat_id}:{user_id}:{topic_id}")
}

pub fn recent_topics_key(chat_id: i64, user_id: i64) -> String {
    format!("cache:recent_topics:{chat_id}:{user_id}")
}

pub fn messages_key(thread_id: i64) -> String {
    format!("messages:{thread_id}")
}

pub fn files_key(thread_id: i64) -> String {
    format!("files:{thread_id}")
}
