//! In-memory `SqlConnection` for unit tests.
//!
//! Understands the statements this crate generates for MySQL and PostgreSQL:
//! catalog lookups, ordered selects with key predicates and row windows,
//! aggregates, DDL for the result store, upserts and deletes. Every statement
//! and session-state change is logged for assertions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;

use crate::core::schema::TableRef;
use crate::core::traits::SqlConnection;
use crate::core::value::{Row, SqlValue};
use crate::error::{CheckError, Result};

/// Table definition and contents.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    table: TableRef,
    columns: Vec<(String, String)>,
    primary_key: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            table: TableRef::new(schema, name),
            columns: Vec::new(),
            primary_key: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// `id int` primary key plus `val varchar`, ids `1..=n`.
    pub fn numbered(schema: &str, name: &str, n: i64) -> Self {
        (1..=n).fold(
            Self::new(schema, name)
                .column("id", "int")
                .column("val", "varchar")
                .primary_key(&["id"]),
            |t, i| t.row(vec![SqlValue::I32(i as i32), SqlValue::Text(format!("row-{}", i))]),
        )
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push((name.to_string(), data_type.to_string()));
        self
    }

    pub fn primary_key(mut self, cols: &[&str]) -> Self {
        self.primary_key = cols.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn row(mut self, values: Row) -> Self {
        self.rows.push(values);
        self
    }

    fn col_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(c, _)| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: BTreeMap<(String, String), MemoryTable>,
}

#[derive(Debug, Default)]
struct Session {
    statements: Vec<String>,
    in_snapshot: bool,
    change_logging: bool,
    logging_history: Vec<bool>,
    fail_on: Vec<String>,
}

/// One session on an in-memory node.
///
/// Sessions created with [`MemoryConnection::session`] share tables but keep
/// their own statement log and session state.
pub struct MemoryConnection {
    engine: String,
    shared: Arc<Mutex<Shared>>,
    session: Mutex<Session>,
}

enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
}

impl MemoryConnection {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            shared: Arc::new(Mutex::new(Shared::default())),
            session: Mutex::new(Session {
                change_logging: true,
                ..Session::default()
            }),
        }
    }

    /// Another session on the same node.
    pub fn session(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            shared: self.shared.clone(),
            session: Mutex::new(Session {
                change_logging: true,
                ..Session::default()
            }),
        }
    }

    pub fn add_table(&self, table: MemoryTable) {
        let key = (table.table.schema.clone(), table.table.name.clone());
        self.shared().tables.insert(key, table);
    }

    /// Change the reported data type of a column.
    pub fn retype_column(&self, schema: &str, table: &str, column: &str, data_type: &str) {
        let mut shared = self.shared();
        if let Some(t) = shared.tables.get_mut(&(schema.to_string(), table.to_string())) {
            if let Some(i) = t.col_index(column) {
                t.columns[i].1 = data_type.to_string();
            }
        }
    }

    /// Overwrite one value of the row whose first key column equals `key`.
    pub fn update_row(&self, schema: &str, table: &str, key: i64, column: usize, value: SqlValue) {
        let mut shared = self.shared();
        if let Some(t) = shared.tables.get_mut(&(schema.to_string(), table.to_string())) {
            let k = t
                .primary_key
                .first()
                .and_then(|pk| t.col_index(pk))
                .unwrap_or(0);
            for row in t.rows.iter_mut() {
                if row[k].as_i64() == Some(key) {
                    row[column] = value.clone();
                }
            }
        }
    }

    /// Remove the row whose first key column equals `key`.
    pub fn delete_row(&self, schema: &str, table: &str, key: i64) {
        let mut shared = self.shared();
        if let Some(t) = shared.tables.get_mut(&(schema.to_string(), table.to_string())) {
            let k = t
                .primary_key
                .first()
                .and_then(|pk| t.col_index(pk))
                .unwrap_or(0);
            t.rows.retain(|row| row[k].as_i64() != Some(key));
        }
    }

    /// Current rows of a table.
    pub fn rows(&self, schema: &str, table: &str) -> Vec<Row> {
        self.shared()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Statements (and session-state changes) issued on this session.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.state().statements.clear();
    }

    pub fn in_snapshot(&self) -> bool {
        self.state().in_snapshot
    }

    pub fn change_logging(&self) -> bool {
        self.state().change_logging
    }

    /// Every value passed to `set_change_logging`, in order.
    pub fn logging_history(&self) -> Vec<bool> {
        self.state().logging_history.clone()
    }

    /// Fail any later statement containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        self.state().fail_on.push(fragment.to_string());
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(&self, statement: &str) -> Result<()> {
        let mut session = self.state();
        session.statements.push(statement.to_string());
        if session.fail_on.iter().any(|f| statement.contains(f.as_str())) {
            return Err(CheckError::execution(
                self.engine.clone(),
                format!("injected failure: {}", statement),
            ));
        }
        Ok(())
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<Outcome> {
        let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        self.log(&flat)?;
        let lower = flat.to_lowercase();

        if lower.contains("information_schema.columns") {
            return Ok(Outcome::Rows(self.catalog_columns(params)));
        }
        if lower.contains("key_column_usage") || lower.contains("pg_constraint") {
            return Ok(Outcome::Rows(self.catalog_primary_key(params)));
        }
        if lower.contains("information_schema.tables") {
            return Ok(Outcome::Rows(self.catalog_tables(params)));
        }
        if lower.starts_with("create database") || lower.starts_with("create schema") {
            return Ok(Outcome::Affected(0));
        }
        if lower.starts_with("create table") {
            return self.create_table(&flat);
        }
        if lower.starts_with("insert into") {
            return self.upsert(&flat, params);
        }
        if lower.starts_with("delete from") {
            return self.delete(&flat, params);
        }
        if lower.starts_with("update") {
            return self.update(&flat, params);
        }
        if lower.starts_with("select") {
            return self.select(&flat, params);
        }
        Err(self.unsupported(&flat))
    }

    fn unsupported(&self, sql: &str) -> CheckError {
        CheckError::execution(self.engine.clone(), format!("unsupported statement: {}", sql))
    }

    fn catalog_columns(&self, params: &[SqlValue]) -> Vec<Row> {
        let key = param_key(params);
        self.shared()
            .tables
            .get(&key)
            .map(|t| {
                t.columns
                    .iter()
                    .enumerate()
                    .map(|(i, (name, ty))| {
                        vec![
                            SqlValue::Text(name.clone()),
                            SqlValue::Text(ty.clone()),
                            SqlValue::I64(i as i64 + 1),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn catalog_primary_key(&self, params: &[SqlValue]) -> Vec<Row> {
        let key = param_key(params);
        self.shared()
            .tables
            .get(&key)
            .map(|t| {
                t.primary_key
                    .iter()
                    .map(|c| vec![SqlValue::Text(c.clone())])
                    .collect()
            })
            .unwrap_or_default()
    }

    fn catalog_tables(&self, params: &[SqlValue]) -> Vec<Row> {
        let schema = params
            .first()
            .map(SqlValue::canonical_text)
            .unwrap_or_default();
        self.shared()
            .tables
            .keys()
            .filter(|(s, _)| *s == schema)
            .map(|(_, t)| vec![SqlValue::Text(t.clone())])
            .collect()
    }

    fn create_table(&self, sql: &str) -> Result<Outcome> {
        let re = regex(r"(?i)^create table if not exists (\S+) \((.*)\)");
        let caps = re.captures(sql).ok_or_else(|| self.unsupported(sql))?;
        let table = parse_table(&caps[1]).ok_or_else(|| self.unsupported(sql))?;
        let key = (table.schema.clone(), table.name.clone());

        let mut def = MemoryTable::new(&table.schema, &table.name);
        for part in split_top_level(&caps[2]) {
            let part = part.trim();
            if part.to_lowercase().starts_with("primary key") {
                let inner = part
                    .split_once('(')
                    .and_then(|(_, rest)| rest.rsplit_once(')'))
                    .map(|(cols, _)| cols)
                    .unwrap_or_default();
                def.primary_key = split_top_level(inner).iter().map(|c| unquote(c)).collect();
            } else {
                let mut tokens = part.split_whitespace();
                if let (Some(name), Some(ty)) = (tokens.next(), tokens.next()) {
                    def.columns.push((unquote(name), ty.to_lowercase()));
                }
            }
        }

        self.shared().tables.entry(key).or_insert(def);
        Ok(Outcome::Affected(0))
    }

    fn upsert(&self, sql: &str, params: &[SqlValue]) -> Result<Outcome> {
        let re = regex(r"(?i)^insert into (\S+) \(([^)]*)\) values \(([^)]*)\)(.*)$");
        let caps = re.captures(sql).ok_or_else(|| self.unsupported(sql))?;
        let table = parse_table(&caps[1]).ok_or_else(|| self.unsupported(sql))?;
        let columns: Vec<String> = split_top_level(&caps[2]).iter().map(|c| unquote(c)).collect();
        let placeholders = split_top_level(&caps[3]);
        let values = bind_placeholders(&placeholders, params);

        let update_re = regex(r#"(?i)([`"]?\w+[`"]?)\s*=\s*(?:values|excluded)"#);
        let update_cols: Vec<String> = update_re
            .captures_iter(&caps[4])
            .map(|c| unquote(&c[1]))
            .collect();

        let mut shared = self.shared();
        let t = shared
            .tables
            .get_mut(&(table.schema.clone(), table.name.clone()))
            .ok_or_else(|| CheckError::execution(self.engine.clone(), format!("no table {}", table)))?;

        let mut incoming = vec![SqlValue::Null; t.columns.len()];
        for (col, value) in columns.iter().zip(values) {
            if let Some(i) = t.col_index(col) {
                incoming[i] = value;
            }
        }

        let key_idx: Vec<usize> = t.primary_key.iter().filter_map(|k| t.col_index(k)).collect();
        let existing = t
            .rows
            .iter_mut()
            .find(|row| key_idx.iter().all(|&i| compare(&row[i], &incoming[i]) == Some(Ordering::Equal)));

        match existing {
            Some(row) => {
                for col in &update_cols {
                    if let Some(i) = columns
                        .iter()
                        .position(|c| c.eq_ignore_ascii_case(col))
                        .and_then(|_| {
                            t.columns
                                .iter()
                                .position(|(c, _)| c.eq_ignore_ascii_case(col))
                        })
                    {
                        row[i] = incoming[i].clone();
                    }
                }
            }
            None => t.rows.push(incoming),
        }
        Ok(Outcome::Affected(1))
    }

    fn delete(&self, sql: &str, params: &[SqlValue]) -> Result<Outcome> {
        let re = regex(r"(?i)^delete from (\S+)(?: where (.+))?$");
        let caps = re.captures(sql).ok_or_else(|| self.unsupported(sql))?;
        let table = parse_table(&caps[1]).ok_or_else(|| self.unsupported(sql))?;
        let conditions = parse_conditions(caps.get(2).map(|m| m.as_str()), params)
            .ok_or_else(|| self.unsupported(sql))?;

        let mut shared = self.shared();
        let t = shared
            .tables
            .get_mut(&(table.schema.clone(), table.name.clone()))
            .ok_or_else(|| CheckError::execution(self.engine.clone(), format!("no table {}", table)))?;
        let columns = t.columns.clone();
        let before = t.rows.len();
        t.rows.retain(|row| !matches_all(&columns, row, &conditions));
        Ok(Outcome::Affected((before - t.rows.len()) as u64))
    }

    fn update(&self, sql: &str, params: &[SqlValue]) -> Result<Outcome> {
        let re = regex(r"(?i)^update (\S+) set (.+?) where (.+)$");
        let caps = re.captures(sql).ok_or_else(|| self.unsupported(sql))?;
        let table = parse_table(&caps[1]).ok_or_else(|| self.unsupported(sql))?;
        let set_re = regex(r"^(\S+)\s*=\s*(\?|\$\d+(?:::\w+)?)$");
        let mut next = 0usize;
        let assignments = split_top_level(&caps[2])
            .iter()
            .map(|part| {
                let c = set_re.captures(part.trim())?;
                Some((unquote(&c[1]), resolve_placeholder(&c[2], params, &mut next)))
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.unsupported(sql))?;
        let conditions = parse_conditions_from(Some(&caps[3]), params, next)
            .ok_or_else(|| self.unsupported(sql))?;

        let mut shared = self.shared();
        let t = shared
            .tables
            .get_mut(&(table.schema.clone(), table.name.clone()))
            .ok_or_else(|| CheckError::execution(self.engine.clone(), format!("no table {}", table)))?;
        let targets = assignments
            .into_iter()
            .map(|(col, value)| t.col_index(&col).map(|i| (i, value)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.unsupported(sql))?;
        let columns = t.columns.clone();
        let mut affected = 0u64;
        for row in t.rows.iter_mut().filter(|row| matches_all(&columns, row, &conditions)) {
            for (i, value) in &targets {
                row[*i] = value.clone();
            }
            affected += 1;
        }
        Ok(Outcome::Affected(affected))
    }

    fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Outcome> {
        let re = regex(
            r"(?i)^select (.+?) from (\S+)(?: where (.+?))?(?: order by (.+?))?(?: limit (.+))?$",
        );
        let caps = re.captures(sql).ok_or_else(|| self.unsupported(sql))?;
        let table = parse_table(&caps[2]).ok_or_else(|| self.unsupported(sql))?;
        let conditions = parse_conditions(caps.get(3).map(|m| m.as_str()), params)
            .ok_or_else(|| self.unsupported(sql))?;

        let shared = self.shared();
        let t = shared
            .tables
            .get(&(table.schema.clone(), table.name.clone()))
            .ok_or_else(|| CheckError::execution(self.engine.clone(), format!("no table {}", table)))?;

        let mut rows: Vec<Row> = t
            .rows
            .iter()
            .filter(|row| matches_all(&t.columns, row, &conditions))
            .cloned()
            .collect();

        if let Some(order) = caps.get(4) {
            let idx: Vec<usize> = split_top_level(order.as_str())
                .iter()
                .filter_map(|c| t.col_index(&unquote(c)))
                .collect();
            rows.sort_by(|a, b| {
                idx.iter()
                    .map(|&i| compare(&a[i], &b[i]).unwrap_or(Ordering::Equal))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if let Some(limit) = caps.get(5) {
            let (offset, count) = parse_window(limit.as_str()).ok_or_else(|| self.unsupported(sql))?;
            rows = rows.into_iter().skip(offset).take(count).collect();
        }

        let projection = split_top_level(&caps[1]);
        let agg_re = regex(r"(?i)^(min|max|count)\((.+)\)$");
        if projection.iter().all(|p| agg_re.is_match(p.trim())) {
            let mut out = Vec::new();
            for p in &projection {
                let c = agg_re.captures(p.trim()).ok_or_else(|| self.unsupported(sql))?;
                let func = c[1].to_lowercase();
                if func == "count" {
                    out.push(SqlValue::I64(rows.len() as i64));
                    continue;
                }
                let i = t.col_index(&unquote(&c[2])).ok_or_else(|| self.unsupported(sql))?;
                let values = rows.iter().map(|r| r[i].clone()).filter(|v| !v.is_null());
                let picked = if func == "min" {
                    values.min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
                } else {
                    values.max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
                };
                out.push(picked.unwrap_or(SqlValue::Null));
            }
            return Ok(Outcome::Rows(vec![out]));
        }

        let idx: Vec<usize> = projection
            .iter()
            .map(|c| t.col_index(&unquote(c)).ok_or_else(|| self.unsupported(sql)))
            .collect::<Result<_>>()?;
        Ok(Outcome::Rows(
            rows.iter()
                .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        ))
    }
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        match self.run(sql, params)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Ok(Vec::new()),
        }
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self.run(sql, params)? {
            Outcome::Rows(rows) => Ok(rows.len() as u64),
            Outcome::Affected(n) => Ok(n),
        }
    }

    async fn begin_snapshot(&self) -> Result<()> {
        self.log("BEGIN SNAPSHOT")?;
        self.state().in_snapshot = true;
        Ok(())
    }

    async fn end_snapshot(&self) -> Result<()> {
        self.state().in_snapshot = false;
        self.log("END SNAPSHOT")
    }

    async fn set_change_logging(&self, enabled: bool) -> Result<()> {
        self.log(if enabled {
            "SET CHANGE LOGGING ON"
        } else {
            "SET CHANGE LOGGING OFF"
        })?;
        let mut session = self.state();
        session.change_logging = enabled;
        session.logging_history.push(enabled);
        Ok(())
    }
}

#[derive(Debug)]
struct Condition {
    column: String,
    op: String,
    value: SqlValue,
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("bad test regex {}: {}", pattern, e))
}

fn param_key(params: &[SqlValue]) -> (String, String) {
    let get = |i: usize| params.get(i).map(SqlValue::canonical_text).unwrap_or_default();
    (get(0), get(1))
}

fn unquote(s: &str) -> String {
    s.trim().replace(['`', '"'], "")
}

fn parse_table(s: &str) -> Option<TableRef> {
    let name = unquote(s);
    let (schema, table) = name.split_once('.')?;
    Some(TableRef::new(schema, table))
}

fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in s.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Resolve `?` (positional) and `$n` placeholders to parameter values.
fn bind_placeholders(placeholders: &[String], params: &[SqlValue]) -> Vec<SqlValue> {
    let mut next = 0usize;
    placeholders
        .iter()
        .map(|p| resolve_placeholder(p, params, &mut next))
        .collect()
}

fn resolve_placeholder(p: &str, params: &[SqlValue], next: &mut usize) -> SqlValue {
    let p = p.trim();
    let index = if p == "?" {
        let i = *next;
        *next += 1;
        i
    } else {
        p.trim_start_matches('$')
            .split("::")
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .map(|n| n - 1)
            .unwrap_or(usize::MAX)
    };
    params.get(index).cloned().unwrap_or(SqlValue::Null)
}

fn parse_conditions(clause: Option<&str>, params: &[SqlValue]) -> Option<Vec<Condition>> {
    parse_conditions_from(clause, params, 0)
}

/// Conditions whose positional `?` parameters start at `first`.
fn parse_conditions_from(clause: Option<&str>, params: &[SqlValue], first: usize) -> Option<Vec<Condition>> {
    let Some(clause) = clause else {
        return Some(Vec::new());
    };
    let cond_re = regex(r"^(\S+)\s*(>=|<=|=|<|>)\s*(\?|\$\d+(?:::\w+)?)$");
    let and_re = regex(r"(?i)\s+and\s+");
    let mut next = first;
    and_re
        .split(clause)
        .map(|part| {
            let caps = cond_re.captures(part.trim())?;
            Some(Condition {
                column: unquote(&caps[1]),
                op: caps[2].to_string(),
                value: resolve_placeholder(&caps[3], params, &mut next),
            })
        })
        .collect()
}

fn matches_all(columns: &[(String, String)], row: &Row, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| {
        let Some(i) = columns.iter().position(|(n, _)| n.eq_ignore_ascii_case(&c.column)) else {
            return false;
        };
        if row[i].is_null() || c.value.is_null() {
            return false;
        }
        match compare(&row[i], &c.value) {
            Some(o) => match c.op.as_str() {
                "=" => o == Ordering::Equal,
                ">=" => o != Ordering::Less,
                "<=" => o != Ordering::Greater,
                ">" => o == Ordering::Greater,
                "<" => o == Ordering::Less,
                _ => false,
            },
            None => false,
        }
    })
}

/// `LIMIT a, b` (MySQL) or `LIMIT b OFFSET a` (PostgreSQL) as `(offset, count)`.
fn parse_window(s: &str) -> Option<(usize, usize)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once(',') {
        return Some((a.trim().parse().ok()?, b.trim().parse().ok()?));
    }
    let re = regex(r"(?i)^(\d+)\s+offset\s+(\d+)$");
    let caps = re.captures(s)?;
    Some((caps[2].parse().ok()?, caps[1].parse().ok()?))
}

fn compare(a: &SqlValue, b: &SqlValue) -> Option<Ordering> {
    use SqlValue::*;
    match (a, b) {
        (Null, Null) => Some(Ordering::Equal),
        (Null, _) => Some(Ordering::Less),
        (_, Null) => Some(Ordering::Greater),
        (I16(_) | I32(_) | I64(_), I16(_) | I32(_) | I64(_)) => {
            Some(a.as_i64()?.cmp(&b.as_i64()?))
        }
        (DateTime(x), DateTime(y)) => Some(x.cmp(y)),
        _ => Some(a.canonical_text().cmp(&b.canonical_text())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_with_key_range_and_window() {
        let conn = MemoryConnection::new("mysql");
        conn.add_table(MemoryTable::numbered("s", "t", 10));
        let rows = conn
            .query(
                "SELECT `id` FROM `s`.`t` WHERE `id` >= ? AND `id` < ? ORDER BY `id` LIMIT 1, 2",
                &[SqlValue::I64(3), SqlValue::I64(9)],
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::I32(4)], vec![SqlValue::I32(5)]]);
    }

    #[tokio::test]
    async fn test_postgres_placeholders_and_window() {
        let conn = MemoryConnection::new("postgres");
        conn.add_table(MemoryTable::numbered("s", "t", 10));
        let rows = conn
            .query(
                "SELECT \"id\" FROM \"s\".\"t\" WHERE \"id\" >= $1::BIGINT AND \"id\" < $2::BIGINT \
                 ORDER BY \"id\" LIMIT 2 OFFSET 0",
                &[SqlValue::I64(5), SqlValue::I64(20)],
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::I32(5)], vec![SqlValue::I32(6)]]);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let conn = MemoryConnection::new("mysql");
        conn.add_table(MemoryTable::numbered("s", "t", 7));
        let rows = conn
            .query("SELECT MIN(`id`), MAX(`id`) FROM `s`.`t`", &[])
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::I32(1), SqlValue::I32(7)]]);
        let rows = conn.query("SELECT COUNT(*) FROM `s`.`t`", &[]).await.unwrap();
        assert_eq!(rows, vec![vec![SqlValue::I64(7)]]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let conn = MemoryConnection::new("mysql");
        conn.fail_on("COUNT");
        assert!(conn.query("SELECT COUNT(*) FROM `s`.`t`", &[]).await.is_err());
    }
}
