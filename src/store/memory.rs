use crate::{
	error::Error,
	schema::ColumnDescriptor,
	store::{values_match, Record, Store},
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

/// In-memory backend: the test double, also handy for demos. Tables are
/// declared up front with the same descriptors the SQL backend would
/// report. Counts every write it applies so tests can assert that an
/// operation issued no write at all.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	tables: HashMap<String, MemTable>,
	mutations: u64,
}

struct MemTable {
	name: String,
	columns: Vec<ColumnDescriptor>,
	rows: Vec<Record>,
	next_id: i64,
}

impl MemTable {
	fn primary_key(&self) -> Option<&ColumnDescriptor> {
		self.columns.iter().find(|c| c.primary_key)
	}

	fn position(&self, pk: &str, id: &Value) -> Option<usize> {
		self.rows.iter().position(|row| values_match(row.get(pk).unwrap_or(&Value::Null), id))
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn create_table(&self, name: &str, columns: Vec<ColumnDescriptor>) {
		let table = MemTable { name: name.to_string(), columns, rows: Vec::new(), next_id: 1 };
		self.lock().tables.insert(name.to_ascii_lowercase(), table);
	}

	/// Loads fixture rows without touching the mutation counter.
	pub fn seed(&self, name: &str, rows: Vec<Record>) {
		let mut inner = self.lock();
		let table = inner.tables.get_mut(&name.to_ascii_lowercase()).expect("seed of undeclared table");
		if let Some(pk) = table.primary_key().map(|c| c.field.clone()) {
			for row in &rows {
				if let Some(id) = row.get(&pk).and_then(Value::as_i64) {
					table.next_id = table.next_id.max(id + 1);
				}
			}
		}
		table.rows.extend(rows);
	}

	/// Number of writes actually applied to any table.
	pub fn mutations(&self) -> u64 {
		self.lock().mutations
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap()
	}
}

fn unknown_table(table: &str) -> Error {
	Error::schema_unavailable(table, "unknown table")
}

fn check_known_columns(table: &MemTable, fields: &Record) -> Result<(), Error> {
	for name in fields.keys() {
		if !table.columns.iter().any(|c| c.field.eq_ignore_ascii_case(name)) {
			return Err(Error::Constraint(format!("Unknown column '{name}' in 'field list'")));
		}
	}
	Ok(())
}

#[async_trait]
impl Store for MemoryStore {
	async fn tables(&self) -> Result<Vec<String>, Error> {
		let inner = self.lock();
		let mut names: Vec<String> = inner.tables.values().map(|t| t.name.clone()).collect();
		names.sort();
		Ok(names)
	}

	async fn describe(&self, table: &str) -> Result<Vec<ColumnDescriptor>, Error> {
		let inner = self.lock();
		let table_data = inner.tables.get(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		Ok(table_data.columns.clone())
	}

	async fn select_all(&self, table: &str) -> Result<Vec<Record>, Error> {
		let inner = self.lock();
		let table = inner.tables.get(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		Ok(table.rows.clone())
	}

	async fn select_where(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>, Error> {
		let inner = self.lock();
		let table = inner.tables.get(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		Ok(table
			.rows
			.iter()
			.filter(|row| values_match(row.get(field).unwrap_or(&Value::Null), value))
			.cloned()
			.collect())
	}

	async fn select_one(&self, table: &str, pk: &str, id: &Value) -> Result<Option<Record>, Error> {
		let inner = self.lock();
		let table = inner.tables.get(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		Ok(table.position(pk, id).map(|i| table.rows[i].clone()))
	}

	async fn insert(&self, table: &str, fields: &Record) -> Result<u64, Error> {
		let mut inner = self.lock();
		let table_data = inner.tables.get_mut(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		check_known_columns(table_data, fields)?;

		let mut row = fields.clone();
		let mut new_id = 0u64;
		for column in table_data.columns.clone() {
			let provided = row.get(&column.field).map(|v| !v.is_null()).unwrap_or(false);
			if column.primary_key && column.auto_generated && !provided {
				let id = table_data.next_id;
				table_data.next_id += 1;
				row.insert(column.field.clone(), Value::from(id));
				new_id = id as u64;
				continue;
			}
			if !provided {
				if column.nullable || column.auto_generated {
					row.entry(column.field.clone()).or_insert(Value::Null);
				} else {
					return Err(Error::Constraint(format!("Field '{}' doesn't have a default value", column.field)));
				}
			}
		}

		if let Some(pk) = table_data.primary_key().map(|c| c.field.clone()) {
			let id = row.get(&pk).cloned().unwrap_or(Value::Null);
			if !id.is_null() && table_data.position(&pk, &id).is_some() {
				return Err(Error::Constraint(format!("Duplicate entry '{id}' for key 'PRIMARY'")));
			}
			if new_id == 0 {
				new_id = id.as_u64().unwrap_or(0);
			}
		}

		table_data.rows.push(row);
		inner.mutations += 1;
		Ok(new_id)
	}

	async fn update(&self, table: &str, pk: &str, id: &Value, fields: &Record) -> Result<u64, Error> {
		let mut inner = self.lock();
		let table_data = inner.tables.get_mut(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		check_known_columns(table_data, fields)?;
		let Some(i) = table_data.position(pk, id) else {
			return Ok(0);
		};
		for (name, value) in fields {
			table_data.rows[i].insert(name.clone(), value.clone());
		}
		inner.mutations += 1;
		Ok(1)
	}

	async fn delete(&self, table: &str, pk: &str, id: &Value) -> Result<u64, Error> {
		let mut inner = self.lock();
		let table_data = inner.tables.get_mut(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		let Some(i) = table_data.position(pk, id) else {
			return Ok(0);
		};
		table_data.rows.remove(i);
		inner.mutations += 1;
		Ok(1)
	}

	async fn adjust_counter(
		&self,
		table: &str,
		pk: &str,
		id: &Value,
		column: &str,
		delta: i64,
		ceiling: Option<&str>,
	) -> Result<u64, Error> {
		let mut inner = self.lock();
		let table_data = inner.tables.get_mut(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		let Some(i) = table_data.position(pk, id) else {
			return Ok(0);
		};
		let row = &mut table_data.rows[i];
		let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
		let next = current + delta;
		if next < 0 {
			return Ok(0);
		}
		if let Some(ceiling) = ceiling {
			let cap = row.get(ceiling).and_then(Value::as_i64).unwrap_or(0);
			if next > cap {
				return Ok(0);
			}
		}
		row.insert(column.to_string(), Value::from(next));
		inner.mutations += 1;
		Ok(1)
	}

	async fn update_guarded(
		&self,
		table: &str,
		pk: &str,
		id: &Value,
		fields: &Record,
		expected: &Record,
	) -> Result<u64, Error> {
		let mut inner = self.lock();
		let table_data = inner.tables.get_mut(&table.to_ascii_lowercase()).ok_or_else(|| unknown_table(table))?;
		check_known_columns(table_data, fields)?;
		let Some(i) = table_data.position(pk, id) else {
			return Ok(0);
		};
		let row = &mut table_data.rows[i];
		for (name, value) in expected {
			if !values_match(row.get(name).unwrap_or(&Value::Null), value) {
				return Ok(0);
			}
		}
		for (name, value) in fields {
			row.insert(name.clone(), value.clone());
		}
		inner.mutations += 1;
		Ok(1)
	}
}
