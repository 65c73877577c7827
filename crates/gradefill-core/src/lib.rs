//! Derives the `Grade level` and `Subjects` fields of standards records from
//! their free-text `Name`, one record at a time, with a settle interval
//! between the two writes of every record.

pub mod iterate;
pub mod memory;
pub mod parse;
pub mod source;
pub mod stop;

pub use iterate::ConfigError;
pub use iterate::CursorState;
pub use iterate::IterationCursor;
pub use iterate::IterationError;
pub use iterate::IteratorConfig;
pub use iterate::RunOutcome;
pub use iterate::RunSummary;
pub use iterate::ThrottledIterator;
pub use memory::MemorySource;
pub use parse::parse_name;
pub use parse::ParseError;
pub use parse::ParsedName;
pub use source::FieldAccessError;
pub use source::RecordSource;
pub use stop::StopControl;
