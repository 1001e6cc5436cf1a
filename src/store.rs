pub mod memory;
pub mod sql;

use crate::{error::Error, schema::ColumnDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A row as the engine sees it: column name to scalar value.
pub type Record = Map<String, Value>;

/// The engine's only door to the backing database. Everything above this
/// trait is storage-agnostic; the two `*_guarded` style operations exist
/// so that capacity checks are a single atomic statement in the store,
/// never a read-then-write pair in the caller.
#[async_trait]
pub trait Store: Send + Sync {
	async fn tables(&self) -> Result<Vec<String>, Error>;

	async fn describe(&self, table: &str) -> Result<Vec<ColumnDescriptor>, Error>;

	async fn select_all(&self, table: &str) -> Result<Vec<Record>, Error>;

	async fn select_where(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>, Error>;

	async fn select_one(&self, table: &str, pk: &str, id: &Value) -> Result<Option<Record>, Error>;

	/// Returns the generated id, or 0 when the table generates none.
	async fn insert(&self, table: &str, fields: &Record) -> Result<u64, Error>;

	async fn update(&self, table: &str, pk: &str, id: &Value, fields: &Record) -> Result<u64, Error>;

	async fn delete(&self, table: &str, pk: &str, id: &Value) -> Result<u64, Error>;

	/// Atomically applies `column = column + delta` to one row, refusing to
	/// go below zero or above the row's `ceiling` column when one is named.
	/// Returns affected rows: 0 means the row is missing or the guard failed.
	async fn adjust_counter(
		&self,
		table: &str,
		pk: &str,
		id: &Value,
		column: &str,
		delta: i64,
		ceiling: Option<&str>,
	) -> Result<u64, Error>;

	/// Atomically applies `fields` to one row only while every `expected`
	/// field still holds its expected value. Returns affected rows.
	async fn update_guarded(
		&self,
		table: &str,
		pk: &str,
		id: &Value,
		fields: &Record,
		expected: &Record,
	) -> Result<u64, Error>;
}

/// Loose scalar equality: `5` and `5.0` match, numbers match their string
/// form. Row matching has to survive ids arriving as strings from a form.
pub fn values_match(a: &Value, b: &Value) -> bool {
	if a == b {
		return true;
	}
	match (a.as_f64(), b.as_f64()) {
		(Some(x), Some(y)) => return x == y,
		_ => {},
	}
	match (a, b) {
		(Value::String(s), other) | (other, Value::String(s)) => match other.as_f64() {
			Some(n) => s.parse::<f64>().map(|p| p == n).unwrap_or(false),
			None => false,
		},
		_ => false,
	}
}
