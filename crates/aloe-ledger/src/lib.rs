pub mod feedback;
pub mod lock;
pub mod paths;

pub use feedback::{FeedbackDigest, FeedbackSnapshot, FeedbackStore};
pub use lock::{LockHolder, WorkspaceLock};
pub use paths::AloePaths;
