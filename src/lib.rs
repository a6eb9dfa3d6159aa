//! Progressive hit counters for search result pages.
//!
//! A page streams search results into its document while a counter polls
//! the markup, counts nested hits (for example files, then matches inside
//! each file) and writes pluralized progress messages with a small dot
//! throbber. Once the document has finished loading, the counter switches to
//! its final "done" messages.
//!
//! ```
//! use hit_counter::{Hierarchy, HierarchicalHitCounter, Level, Page};
//!
//! # fn main() -> hit_counter::Result<()> {
//! let mut page = Page::from_html(
//!     "<body><p id='summary'></p><div class='file'><i class='hit'></i><i class='hit'></i></div></body>",
//! )?;
//! let hierarchy = Hierarchy::new(vec![
//!     Level::new(".file", "file")?
//!         .display("#summary")?
//!         .messages("Searching{0} {3} {4} in {1} {2}", "{3} {4} in {1} {2}"),
//!     Level::new(".hit", "hit")?,
//! ])?;
//! let id = page.install(HierarchicalHitCounter::new("body", hierarchy)?);
//!
//! page.auto_update(id, None)?;
//! page.assert_text("#summary", "Searching ... 2 hits in 1 file")?;
//!
//! page.done_when_ready(id)?;
//! page.finish_loading()?;
//! page.assert_text("#summary", "2 hits in 1 file")?;
//! # Ok(())
//! # }
//! ```

mod counter;
mod dom;
mod format;
mod hierarchy;
mod page;
mod selector;

pub use counter::{
    Counter, HierarchicalHitCounter, HitCounter, HitCounterConfig, Render, Tally, count_hits,
};
pub use dom::{Dom, NodeId};
pub use format::{Label, THROBBER_FRAMES, capitalize, format_template, pluralize, throbber};
pub use hierarchy::{Hierarchy, HierarchyConfig, Level, MessagePhase};
pub use page::{CancelToken, CounterId, DEFAULT_POLL_DELAY_MS, Page, PendingTimer, PollHandle};
pub use selector::Selector;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("dom mutation error: {0}")]
    DomMutation(String),
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("timer error: {0}")]
    Timer(String),
    #[error("unknown counter: {0}")]
    UnknownCounter(usize),
    #[error(
        "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
    )]
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}
