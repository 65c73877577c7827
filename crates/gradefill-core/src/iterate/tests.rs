use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::*;
use crate::memory::MemorySource;

const NAMES: [&str; 4] = ["G5 Mathematics", "K Reading", "g5 Science", "G3 English Language Arts"];

fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected about {expected:?}, got {elapsed:?}"
    );
}

fn untouched(row: &BTreeMap<String, String>) -> bool {
    !row.contains_key("Grade level") && !row.contains_key("Subjects")
}

/// Raises the stop control once a given number of records got their
/// subjects written.
struct StopAfter {
    inner: MemorySource,
    stop: StopControl,
    remaining: usize,
}

#[async_trait]
impl RecordSource for StopAfter {
    async fn rewind(&mut self) -> Result<(), FieldAccessError> {
        self.inner.rewind().await
    }

    async fn advance(&mut self) -> Result<bool, FieldAccessError> {
        self.inner.advance().await
    }

    async fn field(&self, name: &str) -> Result<String, FieldAccessError> {
        self.inner.field(name).await
    }

    async fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldAccessError> {
        self.inner.set_field(name, value).await?;
        if name == "Subjects" {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.stop.request_stop();
            }
        }
        Ok(())
    }
}

/// Fails every write to one field with an unavailable store.
struct FailingWrites {
    inner: MemorySource,
    field: &'static str,
}

#[async_trait]
impl RecordSource for FailingWrites {
    async fn rewind(&mut self) -> Result<(), FieldAccessError> {
        self.inner.rewind().await
    }

    async fn advance(&mut self) -> Result<bool, FieldAccessError> {
        self.inner.advance().await
    }

    async fn field(&self, name: &str) -> Result<String, FieldAccessError> {
        self.inner.field(name).await
    }

    async fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldAccessError> {
        if name == self.field {
            return Err(FieldAccessError::Unavailable {
                reason: String::from("store went away"),
            });
        }
        self.inner.set_field(name, value).await
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_writes_every_record_in_order() {
    let mut source = MemorySource::from_names(NAMES);
    let started = Instant::now();

    let summary = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            processed: 4,
            outcome: RunOutcome::Exhausted
        }
    );
    assert_elapsed(started, DEFAULT_SETTLE_INTERVAL * 4);

    let expected = [
        ("5", "Mathematics"),
        ("K", "Reading"),
        ("g5", "Science"),
        ("3", "English Language Arts"),
    ];
    for (row, (level, subject)) in source.rows().iter().zip(expected) {
        assert_eq!(row["Grade level"], level);
        assert_eq!(row["Subjects"], subject);
    }

    let order = source
        .journal()
        .iter()
        .map(|w| (w.position, w.field.as_str()))
        .collect::<Vec<_>>();
    let expected_order = (0..4)
        .flat_map(|pos| [(pos, "Grade level"), (pos, "Subjects")])
        .collect::<Vec<_>>();
    assert_eq!(order, expected_order);
}

#[tokio::test(start_paused = true)]
async fn subjects_write_waits_for_the_settle_interval() {
    let mut source = MemorySource::from_names(["G1 Art", "G2 Art"]);
    let config = IteratorConfig {
        settle_interval: Duration::from_millis(250),
        ..Default::default()
    };

    ThrottledIterator::new(&mut source, config).start().await.unwrap();

    let journal = source.journal();
    for pair in journal.chunks(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= Duration::from_millis(250) && gap < Duration::from_millis(300));
    }
    // The next record starts right after the previous subjects write.
    assert!(journal[2].at - journal[1].at < Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn zero_settle_interval_does_not_wait() {
    let mut source = MemorySource::from_names(NAMES);
    let config = IteratorConfig {
        settle_interval: Duration::ZERO,
        ..Default::default()
    };
    let started = Instant::now();

    let summary = ThrottledIterator::new(&mut source, config).start().await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_elapsed(started, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn empty_source_completes_immediately() {
    let mut source = MemorySource::default();

    let summary = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.outcome, RunOutcome::Exhausted);
    assert!(source.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn parse_failure_halts_the_run() {
    let mut source = MemorySource::from_names(["G5 Mathematics", "NoSpaceHere", "K Reading"]);

    let err = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IterationError::Parse {
            position: 1,
            source: ParseError::MissingLevel { .. }
        }
    ));
    let rows = source.rows();
    assert_eq!(rows[0]["Grade level"], "5");
    assert_eq!(rows[0]["Subjects"], "Mathematics");
    assert!(untouched(&rows[1]));
    assert!(untouched(&rows[2]));
    assert_eq!(source.journal().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_name_field_halts_the_run() {
    let mut rows = vec![BTreeMap::from([(String::from("Name"), String::from("K Reading"))])];
    rows.push(BTreeMap::from([(String::from("Title"), String::from("G1 Art"))]));
    let mut source = MemorySource::new(rows);

    let err = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.position(), Some(1));
    assert!(matches!(
        err,
        IterationError::FieldAccess {
            source: FieldAccessError::MissingField { ref field },
            ..
        } if field == "Name"
    ));
    assert!(untouched(&source.rows()[1]));
}

#[tokio::test(start_paused = true)]
async fn stop_between_records_leaves_the_rest_untouched() {
    let stop = StopControl::default();
    let mut source = StopAfter {
        inner: MemorySource::from_names(NAMES),
        stop: stop.clone(),
        remaining: 2,
    };

    let summary = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .with_stop_control(stop)
        .start()
        .await
        .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            processed: 2,
            outcome: RunOutcome::Stopped
        }
    );
    let rows = source.inner.rows();
    assert_eq!(rows[1]["Subjects"], "Reading");
    assert!(untouched(&rows[2]));
    assert!(untouched(&rows[3]));
}

#[tokio::test(start_paused = true)]
async fn stop_does_not_interrupt_the_settle_wait() {
    let mut source = MemorySource::from_names(["1 A", "2 B", "3 C", "4 D", "5 E"]);
    let mut iterator = ThrottledIterator::new(&mut source, IteratorConfig::default());
    let stop = iterator.stop_control();

    let (summary, ()) = tokio::join!(iterator.start(), async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stop.request_stop();
    });

    let summary = summary.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.outcome, RunOutcome::Stopped);

    let rows = source.rows();
    assert_eq!(rows[2]["Grade level"], "3");
    assert_eq!(rows[2]["Subjects"], "C");
    assert!(untouched(&rows[3]));
    assert!(untouched(&rows[4]));
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_visits_nothing() {
    let mut source = MemorySource::from_names(NAMES);
    let stop = StopControl::new("Close");
    stop.request_stop();

    let summary = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .with_stop_control(stop)
        .start()
        .await
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert!(source.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rerun_yields_identical_fields() {
    let mut source = MemorySource::from_names(NAMES);

    ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap();
    let first = source.rows().to_vec();

    let summary = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(source.rows(), first.as_slice());
    assert_eq!(source.journal().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn field_names_are_configurable() {
    let mut source = MemorySource::new(vec![BTreeMap::from([(
        String::from("Title"),
        String::from("G7 Chemistry"),
    )])]);
    let config = IteratorConfig {
        name_field: String::from("Title"),
        level_field: String::from("Level"),
        subjects_field: String::from("Topic"),
        settle_interval: Duration::from_millis(10),
    };

    let mut iterator = ThrottledIterator::new(&mut source, config);
    assert_eq!(iterator.cursor().state, CursorState::Pending);
    iterator.start().await.unwrap();

    let row = &source.rows()[0];
    assert_eq!(row["Level"], "7");
    assert_eq!(row["Topic"], "Chemistry");
    assert_eq!(row["Title"], "G7 Chemistry");
}

#[tokio::test(start_paused = true)]
async fn failed_subjects_write_keeps_the_level_write() {
    let mut source = FailingWrites {
        inner: MemorySource::from_names(["G5 Math", "K Reading"]),
        field: "Subjects",
    };

    let mut iterator = ThrottledIterator::new(&mut source, IteratorConfig::default());
    let err = iterator.start().await.unwrap_err();

    assert_eq!(
        iterator.cursor(),
        &IterationCursor {
            position: 0,
            state: CursorState::Closed
        }
    );
    assert!(matches!(
        err,
        IterationError::FieldAccess {
            position: 0,
            source: FieldAccessError::Unavailable { .. }
        }
    ));

    let rows = source.inner.rows();
    assert_eq!(rows[0]["Grade level"], "5");
    assert!(!rows[0].contains_key("Subjects"));
    assert!(untouched(&rows[1]));
}

#[tokio::test(start_paused = true)]
async fn failed_level_write_halts_before_waiting() {
    let mut source = FailingWrites {
        inner: MemorySource::from_names(["G5 Math"]),
        field: "Grade level",
    };
    let started = Instant::now();

    let err = ThrottledIterator::new(&mut source, IteratorConfig::default())
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.position(), Some(0));
    assert_elapsed(started, Duration::ZERO);
    assert!(untouched(&source.inner.rows()[0]));
}

#[tokio::test(start_paused = true)]
async fn cursor_is_closed_after_the_run() {
    let mut source = MemorySource::from_names(NAMES);
    let mut iterator = ThrottledIterator::new(&mut source, IteratorConfig::default());

    iterator.start().await.unwrap();

    assert_eq!(
        iterator.cursor(),
        &IterationCursor {
            position: 4,
            state: CursorState::Closed
        }
    );
}

#[test]
fn default_field_names_are_distinct() {
    IteratorConfig::default().validate().unwrap();
}

#[test]
fn writing_into_the_name_field_is_rejected() {
    let config = IteratorConfig {
        level_field: String::from("Name"),
        ..Default::default()
    };

    assert!(matches!(
        config.validate(),
        Err(ConfigError::SharedField { ref field, first: "name", second: "level" }) if field == "Name"
    ));
}

#[test]
fn level_and_subjects_must_differ() {
    let config = IteratorConfig {
        subjects_field: String::from("Grade level"),
        ..Default::default()
    };

    assert!(matches!(
        config.validate(),
        Err(ConfigError::SharedField {
            first: "level",
            second: "subjects",
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn shared_field_config_writes_nothing() {
    let mut source = MemorySource::from_names(["G5 Mathematics"]);
    let config = IteratorConfig {
        subjects_field: String::from("Name"),
        ..Default::default()
    };

    let err = ThrottledIterator::new(&mut source, config)
        .start()
        .await
        .unwrap_err();

    assert!(matches!(err, IterationError::Config { .. }));
    assert_eq!(err.position(), None);
    assert!(source.journal().is_empty());
    assert_eq!(source.rows()[0]["Name"], "G5 Mathematics");
}
