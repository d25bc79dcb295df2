//! Feed header interpretation and typed row decoding.
//!
//! The first raw record of a feed is the comment-prefixed column-name
//! declaration; the next few records carry tagged declarations for the
//! primary key, per-column data types, and export mode. Once those are
//! read, every subsequent record decodes into a [`Row`] with NULL
//! normalization, date massaging, and numeric sanitization applied.

use std::collections::HashMap;
use std::path::Path;

use chrono::Datelike;
use feedload_common::{FeedloadError, Result};
use tracing::{debug, warn};

use super::metadata::{ExportMode, FeedMetadata, Row, DATE_TYPES, NUMBER_TYPES};
use super::reader::FeedReader;
use crate::db::Dialect;

/// Byte that introduces a comment line.
pub const COMMENT_CHAR: u8 = b'#';
/// Header tag carrying the primary-key column list.
pub const PRIMARY_KEY_TAG: &str = "primaryKey:";
/// Header tag carrying the declared per-column data types.
pub const DATA_TYPES_TAG: &str = "dbTypes:";
/// Header tag carrying the export mode.
pub const EXPORT_MODE_TAG: &str = "exportMode:";

/// Number of raw records scanned for header tags after the column-name
/// declaration. Large enough to contain all tagged declarations.
const HEADER_LOOKAHEAD: usize = 10;

/// Files below this size get the "small feed" record estimate.
const SMALL_FEED_BYTES: u64 = 100_000_000;

/// Decodes a feed file: header metadata up front, then typed rows.
pub struct FeedParser {
    reader: FeedReader,
    metadata: FeedMetadata,
    record_delim: String,
    field_delim: String,
}

impl FeedParser {
    /// Open a feed file and consume its header.
    ///
    /// On return the stream is positioned at the first data record and
    /// [`metadata`](FeedParser::metadata) is fully populated, including
    /// the feed-specific type overrides and the dialect type remap.
    ///
    /// A missing header tag is a format error: the file does not match
    /// the expected feed format and ingestion cannot proceed.
    pub fn open(
        path: impl AsRef<Path>,
        dialect: Dialect,
        record_delim: &str,
        field_delim: &str,
    ) -> Result<Self> {
        let mut reader = FeedReader::open(path, record_delim.as_bytes(), COMMENT_CHAR)?;

        // Estimated record count from compressed size. Only ever used to
        // pick an ingest strategy; the exact count lives in the file's
        // trailing summary, which would require a full scan to reach.
        let records_expected = if reader.file_size() < SMALL_FEED_BYTES {
            499_999
        } else {
            500_001
        };

        let comment = (COMMENT_CHAR as char).to_string();

        let first = reader
            .next_raw_record(false)?
            .ok_or_else(|| FeedloadError::format("feed file is empty"))?;
        let column_names = split_row(&first, Some(&comment), record_delim, field_delim)?;

        // The remaining header tags can appear in any order within the
        // lookahead window.
        let mut header_rows = Vec::new();
        for _ in 0..HEADER_LOOKAHEAD {
            if let Some(row) = reader.next_raw_record(false)? {
                header_rows.push(row);
            }
        }

        let pk_prefix = format!("{}{}", comment, PRIMARY_KEY_TAG);
        let types_prefix = format!("{}{}", comment, DATA_TYPES_TAG);
        let mode_prefix = format!("{}{}", comment, EXPORT_MODE_TAG);

        let mut primary_key: Option<Vec<String>> = None;
        let mut data_types: Option<Vec<String>> = None;
        let mut export_mode: Option<ExportMode> = None;

        for row in &header_rows {
            if row.starts_with(&pk_prefix) {
                let mut pk = split_row(row, Some(&pk_prefix), record_delim, field_delim)?;
                if pk == [""] {
                    pk = Vec::new();
                }
                primary_key = Some(pk);
            } else if row.starts_with(&types_prefix) {
                let declared = split_row(row, Some(&types_prefix), record_delim, field_delim)?;
                // Widen one known-undersized decimal; the upstream
                // metadata understates the value range of price columns.
                let widened = declared
                    .into_iter()
                    .map(|t| {
                        if t == "DECIMAL(9,3)" {
                            "DECIMAL(11,3)".to_string()
                        } else {
                            t
                        }
                    })
                    .collect();
                data_types = Some(widened);
            } else if row.starts_with(&mode_prefix) {
                let values = split_row(row, Some(&mode_prefix), record_delim, field_delim)?;
                let tag = values
                    .first()
                    .ok_or_else(|| FeedloadError::format("empty exportMode declaration"))?;
                export_mode = Some(ExportMode::from_tag(tag));
            }
        }

        let primary_key = primary_key
            .ok_or_else(|| FeedloadError::format("missing primaryKey header tag"))?;
        let mut data_types =
            data_types.ok_or_else(|| FeedloadError::format("missing dbTypes header tag"))?;
        let export_mode =
            export_mode.ok_or_else(|| FeedloadError::format("missing exportMode header tag"))?;

        if data_types.len() != column_names.len() {
            return Err(FeedloadError::format(format!(
                "{} columns declared but {} data types",
                column_names.len(),
                data_types.len()
            )));
        }

        apply_type_overrides(&column_names, &mut data_types);

        let mut primary_key_indexes = Vec::with_capacity(primary_key.len());
        for pk in &primary_key {
            let idx = column_names.iter().position(|c| c == pk).ok_or_else(|| {
                FeedloadError::format(format!("primary key column '{}' not in column list", pk))
            })?;
            primary_key_indexes.push(idx);
        }

        // Classify date and numeric columns from the post-override type
        // names, then apply the dialect remap for table creation.
        let mut date_columns = Vec::new();
        let mut number_columns = Vec::new();
        let remap: HashMap<&str, &str> = dialect.type_remap().iter().copied().collect();
        for (j, declared) in data_types.iter_mut().enumerate() {
            if DATE_TYPES.contains(&declared.as_str()) {
                date_columns.push(j);
            }
            if NUMBER_TYPES.contains(&declared.as_str()) {
                number_columns.push(j);
            }
            if let Some(mapped) = remap.get(declared.as_str()) {
                *declared = mapped.to_string();
            }
        }

        debug!(
            columns = column_names.len(),
            primary_key = ?primary_key,
            export_mode = ?export_mode,
            "Feed header decoded"
        );

        // The lookahead may have consumed data records past the header;
        // replay from the top so none are lost. Comment lines are
        // filtered during data reads anyway.
        reader.reopen()?;

        Ok(Self {
            reader,
            metadata: FeedMetadata {
                column_names,
                data_types,
                primary_key,
                primary_key_indexes,
                export_mode,
                records_expected,
                date_columns,
                number_columns,
            },
            record_delim: record_delim.to_string(),
            field_delim: field_delim.to_string(),
        })
    }

    /// Decoded header metadata.
    pub fn metadata(&self) -> &FeedMetadata {
        &self.metadata
    }

    /// Trim the decoded schema to the column count of the target table.
    pub fn trim_columns(&mut self, count: usize) {
        self.metadata.trim_columns(count);
    }

    /// Compressed size of the feed file.
    pub fn file_size(&self) -> u64 {
        self.reader.file_size()
    }

    /// Index of the most recently decoded record.
    pub fn latest_record_num(&self) -> i64 {
        self.reader.latest_record_num()
    }

    /// Reposition to the start of logical record `record_num`; see
    /// [`FeedReader::seek_to_record`].
    pub fn seek_to_record(&mut self, record_num: i64) -> Result<()> {
        self.reader.seek_to_record(record_num)
    }

    /// Decode the next data record, or `None` at end of stream.
    ///
    /// A record whose numeric field has no salvageable digits is logged
    /// and skipped, and decoding moves on to the next record.
    pub fn next_record(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(raw) = self.reader.next_raw_record(true)? else {
                return Ok(None);
            };
            self.reader.bump_record_count();

            let mut fields = split_row(&raw, None, &self.record_delim, &self.field_delim)?;
            // Extra trailing fields beyond the declared columns are dropped.
            fields.truncate(self.metadata.column_names.len());

            let mut row: Row = fields
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    if value.is_empty() && !self.metadata.primary_key_indexes.contains(&i) {
                        None
                    } else {
                        Some(value)
                    }
                })
                .collect();

            let current_year = chrono::Utc::now().year();
            for &j in &self.metadata.date_columns {
                if let Some(Some(value)) = row.get_mut(j) {
                    *value = normalize_date(value, current_year);
                }
            }

            let mut unsalvageable = false;
            for &j in &self.metadata.number_columns {
                if let Some(Some(value)) = row.get_mut(j) {
                    if !value.is_empty() && !value.as_bytes()[0].is_ascii_digit() {
                        // Seen in the wild: integer fields wrapped in
                        // square brackets, and the occasional literal
                        // "<UnknownKeyException>".
                        let cleaned: String = value
                            .chars()
                            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                            .collect();
                        if cleaned.is_empty() {
                            unsalvageable = true;
                            break;
                        }
                        *value = cleaned;
                    }
                }
            }

            if unsalvageable {
                warn!(
                    record = self.reader.latest_record_num(),
                    "Skipping malformed record: numeric field with no digits"
                );
                continue;
            }

            return Ok(Some(row));
        }
    }

    /// Decode up to `max` records (fewer at end of stream).
    pub fn next_records(&mut self, max: usize) -> Result<Vec<Row>> {
        let mut records = Vec::new();
        for _ in 0..max {
            match self.next_record()? {
                Some(row) => records.push(row),
                None => break,
            }
        }
        Ok(records)
    }

    /// Decode the next record as a column-name-keyed map.
    pub fn next_record_map(&mut self) -> Result<Option<HashMap<String, Option<String>>>> {
        let Some(row) = self.next_record()? else {
            return Ok(None);
        };
        Ok(Some(
            self.metadata
                .column_names
                .iter()
                .cloned()
                .zip(row)
                .collect(),
        ))
    }
}

/// Feed-specific type overrides, applied over the declared types before
/// any row is decoded. These compensate for known inaccuracies in the
/// upstream metadata and must be reproduced exactly for data fidelity.
fn apply_type_overrides(column_names: &[String], data_types: &mut [String]) {
    for (column, db_type) in column_names.iter().zip(data_types.iter_mut()) {
        if column == "export_date" {
            *db_type = "BIGINT".to_string();
        } else if column.ends_with("_date") {
            *db_type = "DATETIME".to_string();
        } else if column.ends_with("_id") && db_type != "INTEGER" && db_type != "BIGINT" {
            *db_type = "BIGINT".to_string();
        } else if column.starts_with("is_") {
            *db_type = "BOOLEAN".to_string();
        }
    }
}

/// Strip `required_prefix` and the record delimiter from a raw record,
/// then split on the field delimiter.
///
/// A missing required prefix is a format error.
fn split_row(
    raw: &str,
    required_prefix: Option<&str>,
    record_delim: &str,
    field_delim: &str,
) -> Result<Vec<String>> {
    let rest = match required_prefix {
        Some(prefix) => raw.strip_prefix(prefix).ok_or_else(|| {
            FeedloadError::format(format!(
                "required prefix '{}' not found in '{}'",
                prefix,
                raw.trim_end()
            ))
        })?,
        None => raw,
    };
    let body = match rest.split_once(record_delim) {
        Some((before, _)) => before,
        None => rest,
    };
    Ok(body.split(field_delim).map(str::to_string).collect())
}

/// Normalize a textual date value into a backend-friendly form.
///
/// Most values look like `2009 06 21`; some are
/// `2005-09-06-00:00:00-Etc/GMT`, and a few carry only a year. One- and
/// two-digit leading year fragments are expanded, disambiguating the
/// century against `current_year` (an expansion that lands in the
/// future falls back one century). The value is then cut to 19
/// characters (dropping timezone annotations), remaining dashes become
/// spaces, and a bare 4-digit year is padded out with `-01-01`.
pub fn normalize_date(value: &str, current_year: i32) -> String {
    let mut s = value.trim().to_string();

    if s.len() > 3 {
        let b = s.as_bytes();
        if b[2] == b' ' || b[2] == b'-' {
            // 2-digit year
            s = format!("20{}", s);
            if year_of(&s).map_or(false, |y| y > current_year) {
                s = format!("19{}", &s[2..]);
            }
        } else if b[1] == b' ' || b[1] == b'-' {
            // 1-digit year
            s = format!("200{}", s);
            if year_of(&s).map_or(false, |y| y > current_year) {
                s = format!("199{}", &s[3..]);
            }
        }
    }

    truncate_to(&mut s, 19);
    s = s.replace('-', " ");

    if s.len() == 4 {
        s.push_str("-01-01");
    }
    s
}

fn year_of(s: &str) -> Option<i32> {
    s.get(..4).and_then(|y| y.parse().ok())
}

fn truncate_to(s: &mut String, mut max: usize) {
    if s.len() <= max {
        return;
    }
    while !s.is_char_boundary(max) {
        max -= 1;
    }
    s.truncate(max);
}
