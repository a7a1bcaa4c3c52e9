//! Result-set emission for query callbacks.
//!
//! A [`DataWriter`] is handed to every query callback. The callback declares
//! the result shape with [`DataWriter::define`], streams rows with
//! [`DataWriter::row`] and finishes with [`DataWriter::complete`] or
//! [`DataWriter::empty`]. Frames are buffered and appended to the
//! connection's output in generation order once the callback returns.

use std::sync::Arc;

use bytes::BytesMut;

use crate::datum::{DatumError, Oid, TypeRegistry, Value};
use crate::protocol::{BackendMessage, DataValue, FieldDescription, FormatCode};

/// A result-set column and its attributes.
///
/// See: <https://www.postgresql.org/docs/current/catalog-pg-attribute.html>
#[derive(Debug, Clone)]
pub struct Column {
    /// OID of the table this column originates from (0 if synthetic).
    pub table: i32,
    /// Column name. Must be non-empty.
    pub name: String,
    /// Column attribute number (0 if synthetic).
    pub attr_no: i16,
    /// Data type OID. Must resolve to a registered codec before a data row
    /// referencing this column is written.
    pub oid: Oid,
    /// Data type size in bytes (-1 for variable length).
    pub width: i16,
    /// Type modifier (see pg_attribute.atttypmod); encoded as -1 when unset.
    pub type_modifier: Option<i32>,
    /// Wire format for values in this column.
    pub format: FormatCode,
}

impl Column {
    /// Creates a text-format column with no table attribution.
    pub fn text(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            table: 0,
            name: name.into(),
            attr_no: 0,
            oid,
            width: -1,
            type_modifier: None,
            format: FormatCode::Text,
        }
    }

    /// Switches this column to the binary wire format.
    pub fn binary(mut self) -> Self {
        self.format = FormatCode::Binary;
        self
    }

    fn describe(&self) -> FieldDescription {
        FieldDescription {
            name: self.name.clone(),
            table_oid: self.table,
            column_id: self.attr_no,
            type_oid: self.oid,
            type_size: self.width,
            type_modifier: self.type_modifier.unwrap_or(-1),
            format_code: self.format,
        }
    }
}

/// An ordered result-set column list.
pub type Columns = Vec<Column>;

/// Builds the RowDescription message for a column list.
pub(crate) fn row_description(columns: &Columns) -> BackendMessage {
    BackendMessage::RowDescription {
        fields: columns.iter().map(Column::describe).collect(),
    }
}

/// Applies Bind result-format codes to a column list following the
/// protocol's zero/one/N rule.
pub(crate) fn apply_result_formats(columns: &Columns, formats: &[FormatCode]) -> Columns {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let mut column = column.clone();
            column.format = match formats.len() {
                0 => column.format,
                1 => formats[0],
                _ => formats.get(index).copied().unwrap_or(column.format),
            };
            column
        })
        .collect()
}

/// Row-writer misuse and encoding errors.
#[derive(Debug)]
pub enum WriterError {
    /// `row` was called before `define`.
    MissingRowDescription,
    /// `define` was called twice within one command.
    AlreadyDefined,
    /// `complete`/`empty` was called twice within one command.
    AlreadyCompleted,
    /// A column was declared with an empty name.
    UnnamedColumn,
    /// The row value count does not match the declared column count.
    ColumnCountMismatch { defined: usize, given: usize },
    /// A value failed to encode.
    Datum(DatumError),
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::MissingRowDescription => {
                write!(f, "a row description must be defined before writing rows")
            }
            WriterError::AlreadyDefined => {
                write!(f, "the row description has already been defined")
            }
            WriterError::AlreadyCompleted => {
                write!(f, "the command has already been completed")
            }
            WriterError::UnnamedColumn => write!(f, "column name must not be empty"),
            WriterError::ColumnCountMismatch { defined, given } => write!(
                f,
                "unexpected columns, {} columns are defined but {} values were given",
                defined, given
            ),
            WriterError::Datum(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for WriterError {}

impl From<DatumError> for WriterError {
    fn from(e: DatumError) -> Self {
        WriterError::Datum(e)
    }
}

impl From<WriterError> for crate::protocol::ErrorInfo {
    fn from(e: WriterError) -> Self {
        crate::protocol::ErrorInfo::new(e.to_string())
    }
}

/// Buffered writer for one command's result stream.
pub struct DataWriter {
    registry: Arc<TypeRegistry>,
    buf: BytesMut,
    columns: Option<Columns>,
    rows: u64,
    max_rows: u64,
    suspended: bool,
    completed: bool,
}

impl DataWriter {
    pub(crate) fn new(registry: Arc<TypeRegistry>, max_rows: u64) -> Self {
        Self {
            registry,
            buf: BytesMut::new(),
            columns: None,
            rows: 0,
            max_rows,
            suspended: false,
            completed: false,
        }
    }

    /// Declares the result columns and emits the RowDescription header.
    /// Must precede any data row within the same command. An empty column
    /// set is a no-op.
    pub fn define(&mut self, columns: Columns) -> Result<(), WriterError> {
        if columns.is_empty() {
            return Ok(());
        }
        if self.columns.is_some() {
            return Err(WriterError::AlreadyDefined);
        }
        if columns.iter().any(|c| c.name.is_empty()) {
            return Err(WriterError::UnnamedColumn);
        }

        BackendMessage::RowDescription {
            fields: columns.iter().map(Column::describe).collect(),
        }
        .encode(&mut self.buf);
        self.columns = Some(columns);
        Ok(())
    }

    /// Emits one DataRow, encoding each value with the declared column's
    /// codec and format. NULLs are written as the -1 length sentinel without
    /// consulting any codec.
    ///
    /// Once the row limit of the executing portal has been reached the
    /// writer is marked suspended and further rows are discarded; callbacks
    /// may consult [`DataWriter::suspended`] to stop producing early.
    pub fn row(&mut self, values: Vec<Value>) -> Result<(), WriterError> {
        let columns = self
            .columns
            .as_ref()
            .ok_or(WriterError::MissingRowDescription)?;

        if values.len() != columns.len() {
            return Err(WriterError::ColumnCountMismatch {
                defined: columns.len(),
                given: values.len(),
            });
        }

        if self.suspended {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(values.len());
        for (column, value) in columns.iter().zip(&values) {
            if value.is_null() {
                encoded.push(DataValue::Null);
            } else {
                encoded.push(DataValue::Data(self.registry.encode(
                    column.oid,
                    column.format,
                    value,
                )?));
            }
        }

        BackendMessage::DataRow { values: encoded }.encode(&mut self.buf);
        self.rows += 1;
        if self.max_rows > 0 && self.rows >= self.max_rows {
            self.suspended = true;
        }
        Ok(())
    }

    /// Emits CommandComplete with the given tag (e.g. `"SELECT 2"`).
    pub fn complete(&mut self, tag: &str) -> Result<(), WriterError> {
        if self.completed {
            return Err(WriterError::AlreadyCompleted);
        }
        BackendMessage::CommandComplete {
            tag: tag.to_string(),
        }
        .encode(&mut self.buf);
        self.completed = true;
        Ok(())
    }

    /// Emits EmptyQueryResponse in place of a completion tag.
    pub fn empty(&mut self) -> Result<(), WriterError> {
        if self.completed {
            return Err(WriterError::AlreadyCompleted);
        }
        BackendMessage::EmptyQueryResponse.encode(&mut self.buf);
        self.completed = true;
        Ok(())
    }

    /// Number of rows written so far.
    pub fn written(&self) -> u64 {
        self.rows
    }

    /// True once the portal's row limit has been reached.
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn has_output(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Takes the buffered frames for appending to the connection output.
    pub(crate) fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}
