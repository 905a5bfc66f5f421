//! Recognition of check traffic in the change stream.

use std::collections::HashMap;

use chrono::{FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use regex::Regex;
use tracing::{debug, trace};

use crate::check::{CheckDescriptor, CheckMethod, CheckRange};
use crate::core::schema::TableRef;
use crate::core::value::{Row, SqlValue};
use crate::digest::DigestResult;
use crate::error::{CheckError, Result};
use crate::store::RESULT_TABLE;

use super::event::{
    ChangeEvent, CheckAnnotation, CheckWrite, ColumnSpec, EventFragment, RowAction,
    CHECK_METADATA_KEY, DESCRIPTOR_METADATA_KEY, TIME_ZONE_KEY, UTC_OFFSET,
};

/// Replication-event filter callback.
pub trait EventFilter: Send + Sync {
    /// Bind the filter to the schema holding the result store.
    fn configure(&mut self, metadata_schema: &str) -> Result<()>;

    /// Inspect one event. Unrecognized events come back untouched.
    fn filter(&self, event: ChangeEvent) -> Result<ChangeEvent>;
}

/// Annotates writes to the result store so targets apply them in shard order.
///
/// Recognized events get the checked database as their shard id, a
/// `consistency_check` metadata entry naming the check, and their
/// time-zone-sensitive values normalized to UTC.
pub struct ConsistencyCheckFilter {
    metadata_schema: String,
    target: String,
    check_names: bool,
    check_types: bool,
    insert_re: Regex,
    update_re: Regex,
}

impl ConsistencyCheckFilter {
    pub fn new(metadata_schema: &str) -> Result<Self> {
        let insert_re = Regex::new(
            r"(?is)^(?:insert|replace)\s+(?:ignore\s+)?into\s+(\S+)\s*\(([^)]*)\)\s*values\s*(.*)$",
        )
        .map_err(|e| CheckError::Config(format!("insert pattern: {}", e)))?;
        let update_re = Regex::new(r"(?is)^update\s+(\S+)\s+set\s+(.+?)\s+where\s+(.+)$")
            .map_err(|e| CheckError::Config(format!("update pattern: {}", e)))?;

        let mut filter = Self {
            metadata_schema: String::new(),
            target: String::new(),
            check_names: true,
            check_types: true,
            insert_re,
            update_re,
        };
        filter.configure(metadata_schema)?;
        Ok(filter)
    }

    /// Salt flags for checks whose descriptor is not carried by the event.
    pub fn with_salt_defaults(mut self, check_names: bool, check_types: bool) -> Self {
        self.check_names = check_names;
        self.check_types = check_types;
        self
    }

    fn is_store_table(&self, qualified: &str, default_schema: Option<&str>) -> bool {
        let name = strip_quotes(qualified).to_lowercase();
        if name == self.target {
            return true;
        }
        name == RESULT_TABLE
            && default_schema
                .map(|s| s.eq_ignore_ascii_case(&self.metadata_schema))
                .unwrap_or(false)
    }

    /// Prefix and substring test run before any parsing.
    fn looks_like_check(&self, query: &str) -> bool {
        let head = query
            .trim_start()
            .chars()
            .take(7)
            .collect::<String>()
            .to_lowercase();
        (head.starts_with("insert") || head.starts_with("replace") || head.starts_with("update"))
            && strip_quotes(query).to_lowercase().contains(RESULT_TABLE)
    }

    fn recognize(&self, event: &ChangeEvent) -> Result<Option<CheckAnnotation>> {
        for fragment in &event.fragments {
            let fields = match fragment {
                EventFragment::Statement {
                    default_schema,
                    query,
                    ..
                } => {
                    if !self.looks_like_check(query) {
                        continue;
                    }
                    self.parse_statement(query, default_schema.as_deref())?
                }
                EventFragment::RowChanges {
                    schema,
                    table,
                    action,
                    columns,
                    rows,
                    key_columns,
                    keys,
                } => {
                    if !schema.eq_ignore_ascii_case(&self.metadata_schema)
                        || !table.eq_ignore_ascii_case(RESULT_TABLE)
                    {
                        continue;
                    }
                    row_fields(*action, columns, rows, key_columns, keys)
                }
            };

            if let Some(fields) = fields {
                return self.annotation(event, fields).map(Some);
            }
        }
        Ok(None)
    }

    fn parse_statement(&self, query: &str, default_schema: Option<&str>) -> Result<Option<CheckFields>> {
        let flat = collapse_whitespace(query);

        if let Some(caps) = self.insert_re.captures(&flat) {
            if !self.is_store_table(&caps[1], default_schema) {
                return Ok(None);
            }
            let names = split_outside_quotes(&caps[2], ",");
            let values = first_group(&caps[3])
                .map(|group| split_outside_quotes(group, ","))
                .ok_or_else(|| malformed("insert without a value list", query))?;
            if names.len() != values.len() {
                return Err(malformed("column and value counts differ", query));
            }
            let map = names
                .iter()
                .zip(values.iter())
                .map(|(n, v)| (strip_quotes(n).trim().to_lowercase(), parse_literal(v)))
                .collect();
            return Ok(Some(CheckFields {
                action: RowAction::Insert,
                values: map,
            }));
        }

        if let Some(caps) = self.update_re.captures(&flat) {
            if !self.is_store_table(&caps[1], default_schema) {
                return Ok(None);
            }
            let mut map = HashMap::new();
            for part in split_outside_quotes(&caps[2], ",")
                .into_iter()
                .chain(split_outside_quotes(&caps[3], " and "))
            {
                let (name, value) = part
                    .split_once('=')
                    .ok_or_else(|| malformed("expected column = value", query))?;
                map.insert(strip_quotes(name).trim().to_lowercase(), parse_literal(value));
            }
            return Ok(Some(CheckFields {
                action: RowAction::Update,
                values: map,
            }));
        }

        trace!("Statement mentions {} but is not a check write", self.target);
        Ok(None)
    }

    fn annotation(&self, event: &ChangeEvent, fields: CheckFields) -> Result<CheckAnnotation> {
        let schema = fields.text("db")?;
        let table = fields.text("tbl")?;
        let id = fields.int("id")?;

        let descriptor = match event.metadata.get(DESCRIPTOR_METADATA_KEY) {
            Some(wire) => {
                let d = CheckDescriptor::from_bytes(wire.as_bytes())?;
                if d.id() != id || d.schema() != schema || d.table_name() != table {
                    return Err(CheckError::MalformedDescriptor(format!(
                        "event carries {} but writes {}.{}#{}",
                        d, schema, table, id
                    )));
                }
                d
            }
            None => {
                let method = match fields.opt_text("method") {
                    Some(m) => CheckMethod::parse(&m)?,
                    None => CheckMethod::PrimaryKey,
                };
                let range = match (fields.opt_int("row_offset"), fields.opt_int("row_limit")) {
                    (Some(offset), Some(limit)) => Some(CheckRange { offset, limit }),
                    _ => None,
                };
                CheckDescriptor::new(
                    id,
                    TableRef::new(schema, table),
                    range,
                    method,
                    self.check_names,
                    self.check_types,
                )
            }
        };

        let master = fields.result("master_crc", "master_cnt");
        let write = match (fields.action, master) {
            (RowAction::Update, Some(reference)) => CheckWrite::ReferenceResult(reference),
            _ => CheckWrite::Issued {
                reference: fields.result("this_crc", "this_cnt"),
            },
        };

        Ok(CheckAnnotation { descriptor, write })
    }
}

impl EventFilter for ConsistencyCheckFilter {
    fn configure(&mut self, metadata_schema: &str) -> Result<()> {
        crate::core::identifier::validate_identifier(metadata_schema)?;
        self.metadata_schema = metadata_schema.to_string();
        self.target = format!("{}.{}", metadata_schema, RESULT_TABLE).to_lowercase();
        Ok(())
    }

    fn filter(&self, mut event: ChangeEvent) -> Result<ChangeEvent> {
        let Some(annotation) = self.recognize(&event)? else {
            return Ok(event);
        };

        debug!(
            "Event {} carries check {}; routing to shard {}",
            event.seqno,
            annotation.descriptor,
            annotation.descriptor.schema()
        );

        event.shard_id = Some(annotation.descriptor.schema().to_string());
        event
            .metadata
            .insert(CHECK_METADATA_KEY.to_string(), annotation.descriptor.to_string());
        normalize_time_zone(&mut event);
        event.check = Some(annotation);
        Ok(event)
    }
}

/// Column values of one recognized store write.
struct CheckFields {
    action: RowAction,
    values: HashMap<String, SqlValue>,
}

impl CheckFields {
    fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn text(&self, name: &str) -> Result<String> {
        self.opt_text(name)
            .ok_or_else(|| CheckError::MalformedDescriptor(format!("check write without {}", name)))
    }

    fn opt_text(&self, name: &str) -> Option<String> {
        self.get(name).map(SqlValue::canonical_text)
    }

    fn int(&self, name: &str) -> Result<i64> {
        self.opt_int(name)
            .ok_or_else(|| CheckError::MalformedDescriptor(format!("check write without integer {}", name)))
    }

    fn opt_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(SqlValue::as_i64)
    }

    fn result(&self, digest: &str, count: &str) -> Option<DigestResult> {
        Some(DigestResult {
            count: self.opt_int(count)?,
            digest: self.opt_text(digest)?,
        })
    }
}

fn row_fields(
    action: RowAction,
    columns: &[ColumnSpec],
    rows: &[Row],
    key_columns: &[ColumnSpec],
    keys: &[Row],
) -> Option<CheckFields> {
    if action == RowAction::Delete {
        return None;
    }
    let mut values = HashMap::new();
    if let Some(key) = keys.first() {
        for (col, value) in key_columns.iter().zip(key) {
            values.insert(col.name.to_lowercase(), value.clone());
        }
    }
    let row = rows.first()?;
    for (col, value) in columns.iter().zip(row) {
        values.insert(col.name.to_lowercase(), value.clone());
    }
    Some(CheckFields { action, values })
}

fn malformed(what: &str, query: &str) -> CheckError {
    CheckError::MalformedDescriptor(format!("{}: {}", what, query))
}

fn strip_quotes(s: &str) -> String {
    s.replace(['`', '"'], "")
}

/// Text inside the first top-level parenthesised group.
fn first_group(s: &str) -> Option<&str> {
    let start = s.find('(')?;
    let mut depth = 0;
    let mut in_quote = false;
    let mut chars = s[start..].char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' if in_quote => {
                chars.next();
            }
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start + 1..start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `sep` (ASCII, case-insensitive) outside quotes and parentheses.
/// Collapse whitespace runs to one space, leaving quoted literals intact.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.trim().chars();
    let mut in_quote = false;
    let mut pending_space = false;
    while let Some(c) = chars.next() {
        if in_quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '\'' {
            in_quote = true;
        }
        out.push(c);
    }
    out
}

fn split_outside_quotes(s: &str, sep: &str) -> Vec<String> {
    let lower = s.to_ascii_lowercase();
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'\'' {
                in_quote = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => in_quote = true,
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && lower.as_bytes()[i..].starts_with(sep.as_bytes()) => {
                parts.push(s[start..i].trim().to_string());
                i += sep.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    let tail = s[start..].trim();
    if !tail.is_empty() {
        parts.push(tail.to_string());
    }
    parts
}

fn parse_literal(raw: &str) -> SqlValue {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("null") {
        return SqlValue::Null;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    out.push('\'');
                }
                _ => out.push(ch),
            }
        }
        return SqlValue::Text(out);
    }
    match raw.parse::<i64>() {
        Ok(n) => SqlValue::I64(n),
        Err(_) => SqlValue::Text(raw.to_string()),
    }
}

/// Parse a `+HH:MM` / `-HH:MM` session offset.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let (h, m) = (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?);
    if !(0..=23).contains(&h) || !(0..=59).contains(&m) {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

fn to_utc(naive: NaiveDateTime, offset: FixedOffset) -> NaiveDateTime {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.naive_utc())
        .unwrap_or(naive)
}

/// Force UTC on statements and convert row timestamps to UTC.
fn normalize_time_zone(event: &mut ChangeEvent) {
    let source = event
        .metadata
        .get(TIME_ZONE_KEY)
        .and_then(|tz| parse_offset(tz));

    for fragment in event.fragments.iter_mut() {
        match fragment {
            EventFragment::Statement { options, .. } => {
                options.insert(TIME_ZONE_KEY.to_string(), UTC_OFFSET.to_string());
            }
            EventFragment::RowChanges { rows, keys, .. } => {
                for value in rows.iter_mut().chain(keys.iter_mut()).flatten() {
                    match value {
                        SqlValue::DateTimeOffset(dt) => {
                            *dt = dt.with_timezone(&Utc.fix());
                        }
                        SqlValue::DateTime(naive) => {
                            if let Some(offset) = source {
                                *naive = to_utc(*naive, offset);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    event
        .metadata
        .insert(TIME_ZONE_KEY.to_string(), UTC_OFFSET.to_string());
}
