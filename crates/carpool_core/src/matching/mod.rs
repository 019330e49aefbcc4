pub mod engine;
pub mod search;
pub mod waiting_queue;

pub use engine::{try_match, MatchingEngine, RetryOutcome};
pub use search::{candidate_pool, destination_score, search, Candidate, MatchThresholds, SearchQuery};
pub use waiting_queue::{WaitingQueue, WaitingQueueEntry};
