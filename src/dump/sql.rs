use std::io::Write;

use anyhow::{bail, Error};
use log::error;
use mysql::consts::ColumnFlags;
use mysql::prelude::Queryable;
use mysql::{Conn, Row, Value};

use crate::config::DumpConfig;

/// Every data file starts with this line so a replay session interprets the
/// escaped byte strings exactly as they were read.
pub const SET_NAMES_HEADER: &[u8] = b"/*!40101 SET NAMES binary*/;\n";

/// A single column value as it came off the wire.
///
/// The text protocol only ever produces `Null` or raw bytes; the numeric /
/// text split decides whether the bytes are escaped before quoting.
pub enum FieldValue<'a> {
    Null,
    Numeric(&'a [u8]),
    Text(&'a [u8]),
}

/// Escape raw bytes the way the server's real-escape does, appending to
/// `dst`. The buffer is cleared first and grown to `2*len+1` up front so a
/// long value never reallocates mid-escape.
pub fn escape_into(dst: &mut Vec<u8>, src: &[u8]) {
    dst.clear();
    let needed = 2 * src.len() + 1;
    if dst.capacity() < needed {
        dst.reserve(needed - dst.capacity());
    }
    for &byte in src {
        match byte {
            0x00 => dst.extend_from_slice(b"\\0"),
            b'\n' => dst.extend_from_slice(b"\\n"),
            b'\r' => dst.extend_from_slice(b"\\r"),
            b'\\' => dst.extend_from_slice(b"\\\\"),
            b'\'' => dst.extend_from_slice(b"\\'"),
            b'"' => dst.extend_from_slice(b"\\\""),
            0x1a => dst.extend_from_slice(b"\\Z"),
            _ => dst.push(byte),
        }
    }
}

/// Convenience wrapper around [`escape_into`] for one-off values.
pub fn escape(src: &[u8]) -> Vec<u8> {
    let mut dst = Vec::new();
    escape_into(&mut dst, src);
    dst
}

/// Groups rows into `INSERT INTO ... VALUES` statements bounded by a byte
/// target. A statement is closed once its buffered size exceeds the target,
/// checked after the row that crossed it, so the target is overshot by at
/// most one row.
pub struct InsertStatementWriter {
    table: String,
    statement_size: usize,
    statement: Vec<u8>,
    escape_buf: Vec<u8>,
}

impl InsertStatementWriter {
    pub fn new(table: &str, statement_size: usize) -> Self {
        Self {
            table: table.to_string(),
            statement_size,
            statement: Vec::with_capacity(statement_size),
            escape_buf: Vec::new(),
        }
    }

    /// Append one row; flushes the current statement to `out` when it has
    /// grown past the size target.
    pub fn push_row<W: Write>(
        &mut self,
        out: &mut W,
        values: &[FieldValue<'_>],
    ) -> std::io::Result<()> {
        if self.statement.is_empty() {
            write!(self.statement, "INSERT INTO `{}` VALUES\n (", self.table)?;
        } else {
            self.statement.extend_from_slice(b",\n (");
        }

        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.statement.push(b',');
            }
            match value {
                FieldValue::Null => self.statement.extend_from_slice(b"NULL"),
                FieldValue::Numeric(raw) => {
                    // Safe format, quoted but not escaped.
                    self.statement.push(b'"');
                    self.statement.extend_from_slice(raw);
                    self.statement.push(b'"');
                }
                FieldValue::Text(raw) => {
                    escape_into(&mut self.escape_buf, raw);
                    self.statement.push(b'"');
                    self.statement.extend_from_slice(&self.escape_buf);
                    self.statement.push(b'"');
                }
            }
        }

        if self.statement.len() > self.statement_size {
            self.statement.extend_from_slice(b");\n");
            out.write_all(&self.statement)?;
            self.statement.clear();
        } else {
            self.statement.push(b')');
        }
        Ok(())
    }

    /// Terminate and flush the open statement, if any. Must be called once
    /// after the last row so the file never ends in an unterminated INSERT.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        if !self.statement.is_empty() {
            self.statement.extend_from_slice(b";\n");
            out.write_all(&self.statement)?;
            self.statement.clear();
        }
        Ok(())
    }
}

pub(crate) fn build_select_query(
    database: &str,
    table: &str,
    where_predicate: Option<&str>,
) -> String {
    match where_predicate {
        Some(predicate) => format!(
            "SELECT * FROM `{}`.`{}` WHERE {}",
            database, table, predicate
        ),
        None => format!("SELECT * FROM `{}`.`{}`", database, table),
    }
}

/// Stream `SELECT * FROM db.table [WHERE ...]` into `sink` as size-bounded
/// INSERT statements. Rows are iterated one at a time, never materialised.
///
/// A failed SELECT (or a broken row stream) is logged and the rest of the
/// chunk abandoned; statements already flushed are left as they are.
pub fn dump_table_data<W: Write>(
    conn: &mut Conn,
    sink: &mut W,
    database: &str,
    table: &str,
    where_predicate: Option<&str>,
    config: &DumpConfig,
) -> Result<(), Error> {
    sink.write_all(SET_NAMES_HEADER)?;

    let query = build_select_query(database, table, where_predicate);
    let result = match conn.query_iter(query) {
        Ok(result) => result,
        Err(err) => {
            error!("error dumping table ({}.{}) data: {}", database, table, err);
            return Ok(());
        }
    };

    let mut writer = InsertStatementWriter::new(table, config.statement_size);
    for row in result {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                error!("error dumping table ({}.{}) data: {}", database, table, err);
                return Ok(());
            }
        };
        let columns = row.columns_ref();
        let mut values = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            let numeric = columns[i].flags().contains(ColumnFlags::NUM_FLAG);
            let value = match row.as_ref(i) {
                None | Some(Value::NULL) => FieldValue::Null,
                Some(Value::Bytes(bytes)) if numeric => FieldValue::Numeric(bytes),
                Some(Value::Bytes(bytes)) => FieldValue::Text(bytes),
                Some(other) => bail!(
                    "unexpected non-text value in {}.{}: {:?}",
                    database,
                    table,
                    other
                ),
            };
            values.push(value);
        }
        writer.push_row(sink, &values)?;
    }
    writer.finish(sink)?;
    Ok(())
}

/// Text-protocol cell at `index`, lossily decoded. `None` for NULL cells and
/// out-of-range indexes.
pub(crate) fn row_text(row: &Row, index: usize) -> Option<String> {
    match row.as_ref(index) {
        Some(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Like [`row_text`], but locates the column by (case-insensitive) name.
/// Some result sets move columns around between server versions, so callers
/// that care about those fields must not rely on positions.
pub(crate) fn row_text_by_name(row: &Row, name: &str) -> Option<String> {
    let index = row
        .columns_ref()
        .iter()
        .position(|column| column.name_str().eq_ignore_ascii_case(name))?;
    row_text(row, index)
}
