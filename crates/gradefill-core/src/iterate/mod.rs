use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::parse::parse_name;
use crate::parse::ParseError;
use crate::source::FieldAccessError;
use crate::source::RecordSource;
use crate::stop::StopControl;

#[cfg(test)]
mod tests;

/// Wait between the two field writes of a record when none is configured.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct IteratorConfig {
    pub name_field: String,
    pub level_field: String,
    pub subjects_field: String,
    /// Time the store gets to settle after the level write, before the
    /// subjects write. Zero skips the wait.
    pub settle_interval: Duration,
}

impl IteratorConfig {
    /// Checks that the name, level and subjects fields are three different
    /// fields, so a run never writes over the name it reads.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let written = [
            (&self.level_field, "level"),
            (&self.subjects_field, "subjects"),
        ];

        for (field, role) in written {
            if *field == self.name_field {
                return Err(ConfigError::SharedField {
                    field: field.clone(),
                    first: "name",
                    second: role,
                });
            }
        }

        if self.level_field == self.subjects_field {
            return Err(ConfigError::SharedField {
                field: self.level_field.clone(),
                first: "level",
                second: "subjects",
            });
        }

        Ok(())
    }
}

impl Default for IteratorConfig {
    fn default() -> Self {
        Self {
            name_field: String::from("Name"),
            level_field: String::from("Grade level"),
            subjects_field: String::from("Subjects"),
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ConfigError {
    #[error("the {first} and {second} fields are both \"{field}\"")]
    #[diagnostic(
        code(gradefill::iterate::shared_field),
        help("The name, level and subjects fields need three different names.")
    )]
    SharedField {
        field: String,
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    #[default]
    Pending,
    Closed,
}

/// Position of the record being processed, counted from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationCursor {
    pub position: usize,
    pub state: CursorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exhausted,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records that received both writes.
    pub processed: usize,
    pub outcome: RunOutcome,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum IterationError {
    #[error("run refused to start")]
    #[diagnostic(code(gradefill::iterate::config))]
    Config {
        #[from]
        #[diagnostic_source]
        source: ConfigError,
    },

    #[error("run halted at record {position}: its name could not be parsed")]
    #[diagnostic(code(gradefill::iterate::parse))]
    Parse {
        position: usize,
        #[source]
        #[diagnostic_source]
        source: ParseError,
    },

    #[error("run halted at record {position}: a field could not be accessed")]
    #[diagnostic(code(gradefill::iterate::field_access))]
    FieldAccess {
        position: usize,
        #[source]
        #[diagnostic_source]
        source: FieldAccessError,
    },
}

impl IterationError {
    /// Record at which the run halted, if it got to visit any.
    pub fn position(&self) -> Option<usize> {
        match self {
            IterationError::Config { .. } => None,
            IterationError::Parse { position, .. } | IterationError::FieldAccess { position, .. } => {
                Some(*position)
            }
        }
    }
}

/// Walks a [`RecordSource`] once, deriving level and subjects from every
/// record's name.
///
/// Each record gets its level written, then waits the settle interval, then
/// gets its subjects written. The next record is only read after that. A
/// stop request is honoured between records, never in the middle of one.
/// Any error ends the run at the record that caused it.
///
/// After [`start`](Self::start) returns, [`cursor`](Self::cursor) is closed
/// and points at the record the run ended on.
pub struct ThrottledIterator<'s, S: ?Sized> {
    source: &'s mut S,
    config: IteratorConfig,
    stop: StopControl,
    cursor: IterationCursor,
}

impl<'s, S: RecordSource + ?Sized> ThrottledIterator<'s, S> {
    pub fn new(source: &'s mut S, config: IteratorConfig) -> Self {
        Self {
            source,
            config,
            stop: StopControl::default(),
            cursor: IterationCursor::default(),
        }
    }

    pub fn with_stop_control(mut self, stop: StopControl) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_control(&self) -> StopControl {
        self.stop.clone()
    }

    pub fn cursor(&self) -> &IterationCursor {
        &self.cursor
    }

    pub async fn start(&mut self) -> Result<RunSummary, IterationError> {
        self.cursor = IterationCursor::default();
        self.config.validate().map_err(|e| {
            self.cursor.state = CursorState::Closed;
            IterationError::from(e)
        })?;

        info!(
            settle_interval = ?self.config.settle_interval,
            stop_label = self.stop.label(),
            "Starting pass over records"
        );

        self.source
            .rewind()
            .await
            .map_err(|source| self.field_error(source))?;

        loop {
            if self.stop.is_stop_requested() {
                warn!(processed = self.cursor.position, "Stop requested, ending run");
                return Ok(self.close(RunOutcome::Stopped));
            }

            let has_record = self
                .source
                .advance()
                .await
                .map_err(|source| self.field_error(source))?;

            if !has_record {
                info!(processed = self.cursor.position, "All records processed");
                return Ok(self.close(RunOutcome::Exhausted));
            }

            self.process_current().await?;
            self.cursor.position += 1;
        }
    }

    async fn process_current(&mut self) -> Result<(), IterationError> {
        let name = self
            .source
            .field(&self.config.name_field)
            .await
            .map_err(|source| self.field_error(source))?;

        let parsed = parse_name(&name).map_err(|source| {
            self.cursor.state = CursorState::Closed;
            IterationError::Parse {
                position: self.cursor.position,
                source,
            }
        })?;

        self.source
            .set_field(&self.config.level_field, &parsed.level)
            .await
            .map_err(|source| self.field_error(source))?;

        if !self.config.settle_interval.is_zero() {
            tokio::time::sleep(self.config.settle_interval).await;
        }

        self.source
            .set_field(&self.config.subjects_field, &parsed.subject)
            .await
            .map_err(|source| self.field_error(source))?;

        debug!(
            position = self.cursor.position,
            %name,
            level = %parsed.level,
            subject = %parsed.subject,
            "Record updated"
        );

        Ok(())
    }

    fn field_error(&mut self, source: FieldAccessError) -> IterationError {
        self.cursor.state = CursorState::Closed;
        IterationError::FieldAccess {
            position: self.cursor.position,
            source,
        }
    }

    fn close(&mut self, outcome: RunOutcome) -> RunSummary {
        self.cursor.state = CursorState::Closed;
        RunSummary {
            processed: self.cursor.position,
            outcome,
        }
    }
}
