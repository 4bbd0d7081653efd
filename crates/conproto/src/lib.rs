//! conproto
//!
//! Recognizers for the game console's line-oriented output: typed domain
//! events extracted from log lines, and the roster-dump parser. Everything
//! here is stateless and tolerant; a line nothing matches is simply not an
//! event, and a malformed field degrades the line to unrecognized rather
//! than erroring.

pub mod event;
pub mod roster;

pub use event::Event;
pub use event::Matcher;
pub use roster::RosterParser;
pub use roster::RosterRecord;
