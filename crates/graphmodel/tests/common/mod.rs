//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use graphmodel::{Error, Outcome, QueryError, QueryErrorKind, Row, RowSource, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error, select succeeded"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// In-memory row source keyed by an `id` column.
///
/// Counts every fetch, records the requested keys, and can fail the n-th
/// fetch (1-based) once.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<&'static str, Table>,
    selects: AtomicUsize,
    log: Mutex<Vec<(&'static str, Vec<Value>)>>,
    fail_at: Mutex<Option<usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: &'static str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.tables.insert(
            name,
            Table {
                columns: columns.iter().map(|c| (*c).to_string()).collect(),
                rows,
            },
        );
        self
    }

    pub fn fail_select(&self, n: usize) {
        *self.fail_at.lock().unwrap() = Some(n);
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn selects_of(&self, table: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == table)
            .count()
    }

    /// Keys requested by each fetch, in order.
    pub fn requested(&self) -> Vec<(&'static str, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.selects.store(0, Ordering::SeqCst);
        self.log.lock().unwrap().clear();
    }
}

impl RowSource for MemorySource {
    fn fetch(&self, table: &'static str, ids: &[Value]) -> Outcome<Vec<Row>, Error> {
        let n = self.selects.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push((table, ids.to_vec()));

        {
            let mut fail_at = self.fail_at.lock().unwrap();
            if *fail_at == Some(n) {
                *fail_at = None;
                return Outcome::Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Disconnected,
                    table: Some(table.to_string()),
                    message: format!("connection lost during select #{n}"),
                    source: None,
                }));
            }
        }

        let Some(data) = self.tables.get(table) else {
            return Outcome::Err(Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                table: Some(table.to_string()),
                message: "no such table".to_string(),
                source: None,
            }));
        };
        let Some(key) = data.columns.iter().position(|c| c == "id") else {
            return Outcome::Ok(Vec::new());
        };

        let rows = data
            .rows
            .iter()
            .filter(|values| ids.contains(&values[key]))
            .map(|values| Row::new(data.columns.clone(), values.clone()))
            .collect();
        Outcome::Ok(rows)
    }
}

pub fn id(value: i64) -> Value {
    Value::BigInt(value)
}

pub fn opt(value: Option<i64>) -> Value {
    Value::from(value)
}

pub fn ids(values: &[i64]) -> Value {
    Value::Array(values.iter().copied().map(Value::BigInt).collect())
}
