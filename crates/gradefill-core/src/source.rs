use async_trait::async_trait;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum FieldAccessError {
    #[error("no current record, the source has not been advanced onto one")]
    #[diagnostic(code(gradefill::source::no_current_record))]
    NoCurrentRecord,

    #[error("field \"{field}\" does not exist on this record")]
    #[diagnostic(code(gradefill::source::missing_field))]
    MissingField { field: String },

    #[error("field \"{field}\" does not hold text")]
    #[diagnostic(code(gradefill::source::not_text))]
    NotText { field: String },

    #[error("record store is unavailable: {reason}")]
    #[diagnostic(code(gradefill::source::unavailable))]
    Unavailable { reason: String },
}

/// An ordered sequence of records whose fields can be read and written by
/// name, one current record at a time.
#[async_trait]
pub trait RecordSource: Send {
    /// Moves back before the first record.
    async fn rewind(&mut self) -> Result<(), FieldAccessError>;

    /// Moves onto the next record, or the first one after a rewind.
    ///
    /// Returns `false` once the sequence is exhausted.
    async fn advance(&mut self) -> Result<bool, FieldAccessError>;

    async fn field(&self, name: &str) -> Result<String, FieldAccessError>;

    async fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldAccessError>;
}
