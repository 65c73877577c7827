use std::collections::BTreeMap;

use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use futures::StreamExt;
use futures::TryStreamExt;
use gradefill_core::FieldAccessError;
use gradefill_core::parse_name;
use gradefill_core::MemorySource;
use gradefill_core::RecordSource;
use jiff::civil::Date;
use jiff::civil::DateTime;
use jiff::civil::Time;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use kdl::KdlDocument;
use kdl::KdlEntry;
use kdl::KdlNode;
use kdl::KdlValue;
use miette::Context;
use miette::IntoDiagnostic;
use miette::LabeledSpan;
use miette::NamedSource;
use tokio_stream::wrappers::ReadDirStream;
use tracing::debug;

/// Folder below the store root holding the record files.
pub(crate) const RECORDS_FOLDER: &str = "records";

#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) kind: String,
    pub(crate) at: Timestamp,
    pub(crate) fields: BTreeMap<String, KdlValue>,
}

#[derive(Debug)]
struct StoreFile {
    path: Utf8PathBuf,
    document: KdlDocument,
}

#[derive(Debug, Clone, Copy)]
struct RecordSlot {
    file: usize,
    node: usize,
    at: Timestamp,
}

/// Records kept as KDL files, one top-level node per record.
///
/// ```kdl
/// standard "2024-09-01" {
///     Name "G5 Mathematics"
/// }
/// ```
///
/// Files are visited in name order. Every write is flushed to its file
/// right away.
#[derive(Debug)]
pub struct KdlStore {
    files: Vec<StoreFile>,
    slots: Vec<RecordSlot>,
    current: Option<usize>,
}

/// Reads a record's `at` argument. Values without an offset are taken as
/// UTC, a bare date as its midnight.
fn parse_timestamp(value: &str) -> Result<Timestamp, jiff::Error> {
    if let Ok(at) = value.parse::<Timestamp>() {
        return Ok(at);
    }

    let datetime = match value.parse::<DateTime>() {
        Ok(datetime) => datetime,
        Err(_) => value.parse::<Date>()?.to_datetime(Time::midnight()),
    };

    Ok(datetime.to_zoned(TimeZone::UTC)?.timestamp())
}

fn record_timestamp(node: &KdlNode) -> miette::Result<Timestamp> {
    let Some(at_entry) = node.entry(0) else {
        return Err(miette::diagnostic!(
            labels = vec![LabeledSpan::new_primary_with_span(None, node.name().span())],
            "Every record has to have a first argument with a datetime formatted as RFC3339."
        ))?;
    };

    let Some(at) = at_entry.value().as_string() else {
        return Err(miette::diagnostic!(
            labels = vec![LabeledSpan::new_primary_with_span(None, at_entry.span())],
            "This datetime should be a string formatted as RFC3339."
        ))?;
    };

    parse_timestamp(at).map_err(|e| {
        miette::diagnostic!(
            labels = vec![LabeledSpan::new_primary_with_span(
                Some(String::from("here")),
                at_entry.span()
            )],
            help = e.to_string(),
            "Could not parse this datetime as RFC3339."
        )
        .into()
    })
}

fn check_fields(node: &KdlNode) -> miette::Result<()> {
    for field in node.iter_children() {
        if field.entry(0).is_none() {
            return Err(miette::diagnostic!(
                labels = vec![LabeledSpan::new_primary_with_span(
                    Some(String::from("this field")),
                    field.span()
                )],
                help = "Write fields as `Name \"G5 Mathematics\"`.",
                "Field has no value."
            ))?;
        }
    }
    Ok(())
}

async fn read_record_files(path: &Utf8Path) -> miette::Result<Vec<(Utf8PathBuf, String)>> {
    let mut files: Vec<_> = ReadDirStream::new(
        tokio::fs::read_dir(path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not open record folder \"{path}\""))?,
    )
    .map_err(miette::Report::from_err)
    .and_then(|entry| async move {
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|p| miette::miette!("Record file {} is not valid UTF-8", p.display()))?;

        if entry.file_type().await.into_diagnostic()?.is_file() && path.extension() == Some("kdl")
        {
            let bytes = tokio::fs::read_to_string(&path)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not read record file \"{path}\""))?;
            Ok(Some((path, bytes)))
        } else {
            Ok(None)
        }
    })
    .flat_map(|val| futures::stream::iter(val.transpose()))
    .try_collect()
    .await?;

    files.sort_by(|(left, _), (right, _)| left.cmp(right));

    Ok(files)
}

impl KdlStore {
    /// Loads every record below `<root>/records`.
    pub(crate) async fn load(root: &Utf8Path) -> miette::Result<KdlStore> {
        let mut files = vec![];
        let mut slots = vec![];

        for (path, bytes) in read_record_files(&root.join(RECORDS_FOLDER)).await? {
            let with_source =
                |e: miette::Report| e.with_source_code(NamedSource::new(&path, bytes.clone()).with_language("kdl"));

            let document: KdlDocument = bytes
                .parse()
                .map_err(|e: kdl::KdlError| with_source(e.into()))?;

            for (node_idx, node) in document.nodes().iter().enumerate() {
                let at = record_timestamp(node).map_err(with_source)?;
                check_fields(node).map_err(with_source)?;

                slots.push(RecordSlot {
                    file: files.len(),
                    node: node_idx,
                    at,
                });
            }

            debug!(%path, records = document.nodes().len(), "Loaded record file");
            files.push(StoreFile { path, document });
        }

        Ok(KdlStore {
            files,
            slots,
            current: None,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn node(&self, slot: &RecordSlot) -> &KdlNode {
        &self.files[slot.file].document.nodes()[slot.node]
    }

    pub(crate) fn records(&self) -> Vec<Record> {
        self.slots
            .iter()
            .map(|slot| {
                let node = self.node(slot);
                Record {
                    kind: node.name().value().to_string(),
                    at: slot.at,
                    fields: node
                        .iter_children()
                        .filter_map(|field| {
                            field
                                .entry(0)
                                .map(|entry| (field.name().value().to_string(), entry.value().clone()))
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// Records whose name would halt a run, with the reason, by position.
    pub(crate) fn unparseable_names(&self, name_field: &str) -> Vec<(usize, String)> {
        self.records()
            .iter()
            .enumerate()
            .filter_map(|(position, record)| {
                let problem = match record.fields.get(name_field).and_then(|v| v.as_string()) {
                    None => format!("no text field \"{name_field}\""),
                    Some(name) => parse_name(name).err()?.to_string(),
                };
                Some((position, problem))
            })
            .collect()
    }

    /// Copies the text fields of every record into memory, for runs that
    /// must not touch the files.
    pub(crate) fn to_memory(&self) -> MemorySource {
        MemorySource::new(
            self.records()
                .into_iter()
                .map(|record| {
                    record
                        .fields
                        .into_iter()
                        .filter_map(|(name, value)| value.as_string().map(|v| (name, v.to_string())))
                        .collect()
                })
                .collect(),
        )
    }

    fn current_slot(&self) -> Result<RecordSlot, FieldAccessError> {
        self.current
            .and_then(|idx| self.slots.get(idx))
            .copied()
            .ok_or(FieldAccessError::NoCurrentRecord)
    }
}

#[async_trait]
impl RecordSource for KdlStore {
    async fn rewind(&mut self) -> Result<(), FieldAccessError> {
        self.current = None;
        Ok(())
    }

    async fn advance(&mut self) -> Result<bool, FieldAccessError> {
        let next = self.current.map_or(0, |idx| idx + 1).min(self.slots.len());
        self.current = Some(next);
        Ok(next < self.slots.len())
    }

    async fn field(&self, name: &str) -> Result<String, FieldAccessError> {
        let slot = self.current_slot()?;
        let entry = self
            .node(&slot)
            .children()
            .and_then(|fields| fields.get(name))
            .and_then(|field| field.entry(0))
            .ok_or_else(|| FieldAccessError::MissingField {
                field: name.to_string(),
            })?;

        entry
            .value()
            .as_string()
            .map(str::to_string)
            .ok_or_else(|| FieldAccessError::NotText {
                field: name.to_string(),
            })
    }

    async fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldAccessError> {
        let slot = self.current_slot()?;
        let file = &mut self.files[slot.file];
        let fields = file.document.nodes_mut()[slot.node].ensure_children();

        match fields.get_mut(name) {
            Some(field) => match field.entry_mut(0) {
                Some(entry) => *entry = KdlEntry::new(value),
                None => field.push(KdlEntry::new(value)),
            },
            None => {
                let mut field = KdlNode::new(name);
                field.push(KdlEntry::new(value));
                fields.nodes_mut().push(field);
            }
        }

        file.document.autoformat();
        let contents = file.document.to_string();

        tokio::fs::write(&file.path, contents)
            .await
            .map_err(|e| FieldAccessError::Unavailable {
                reason: format!("could not write \"{}\": {e}", file.path),
            })
    }
}
