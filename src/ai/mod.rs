mod retry;
mod summarizer;

pub use retry::{backoff, summarize_with_retry, SUMMARY_ATTEMPTS};
pub use summarizer::{parse_reply, DigestText, Summarize, Summarizer};
