use crate::{error::Error, store::Store};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// One column of a live table, normalized from `SHOW COLUMNS` shaped
/// metadata (`Field`, `Type`, `Null`, `Key`, `Extra`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ColumnDescriptor {
	pub field: String,
	pub sql_type: String,
	pub nullable: bool,
	pub primary_key: bool,
	pub auto_generated: bool,
	pub enum_values: Option<Vec<String>>,
}

impl ColumnDescriptor {
	pub fn from_metadata(field: &str, sql_type: &str, null: &str, key: &str, extra: &str) -> Self {
		Self {
			field: field.to_string(),
			sql_type: sql_type.to_string(),
			nullable: null.eq_ignore_ascii_case("yes"),
			primary_key: key.eq_ignore_ascii_case("pri"),
			auto_generated: extra.to_ascii_lowercase().contains("auto_increment"),
			enum_values: parse_enum_values(sql_type),
		}
	}
}

/// Pulls the literal list out of `enum('a','b')` / `set('a','b')` type
/// strings. Doubled quotes inside a literal are MySQL escapes.
pub fn parse_enum_values(sql_type: &str) -> Option<Vec<String>> {
	let lower = sql_type.trim_start().to_ascii_lowercase();
	let body = if lower.starts_with("enum(") {
		&sql_type.trim_start()[5..]
	} else if lower.starts_with("set(") {
		&sql_type.trim_start()[4..]
	} else {
		return None;
	};
	let body = body.strip_suffix(')')?;

	let mut values = Vec::new();
	let mut current = String::new();
	let mut in_literal = false;
	let mut chars = body.chars().peekable();
	while let Some(c) = chars.next() {
		if in_literal {
			if c == '\'' {
				if chars.peek() == Some(&'\'') {
					chars.next();
					current.push('\'');
				} else {
					in_literal = false;
					values.push(std::mem::take(&mut current));
				}
			} else {
				current.push(c);
			}
		} else if c == '\'' {
			in_literal = true;
		}
	}
	Some(values)
}

#[derive(Clone, Debug, Serialize)]
pub struct TableSchema {
	pub table: String,
	pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
	/// Normalizes the descriptor list: if the store reports more than one
	/// `PRI` column, only the first keeps the flag.
	pub fn new(table: impl Into<String>, mut columns: Vec<ColumnDescriptor>) -> Self {
		let mut seen_primary = false;
		for column in &mut columns {
			if column.primary_key {
				if seen_primary {
					column.primary_key = false;
				}
				seen_primary = true;
			}
		}
		Self { table: table.into(), columns }
	}

	pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
		self.columns.iter().find(|c| c.primary_key)
	}

	pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
		self.columns.iter().find(|c| c.field.eq_ignore_ascii_case(name))
	}
}

/// Descriptor cache, one entry per table. `refresh` re-describes and is
/// what table-view opens call; `open` serves everything else during the
/// view's lifetime.
pub struct SchemaCache {
	store: Arc<dyn Store>,
	cells: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaCache {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store, cells: RwLock::new(HashMap::new()) }
	}

	pub async fn open(&self, table: &str) -> Result<Arc<TableSchema>, Error> {
		let key = table.to_ascii_lowercase();
		if let Some(schema) = self.cells.read().await.get(&key) {
			return Ok(schema.clone());
		}
		self.describe(table, key).await
	}

	pub async fn refresh(&self, table: &str) -> Result<Arc<TableSchema>, Error> {
		let key = table.to_ascii_lowercase();
		self.describe(table, key).await
	}

	async fn describe(&self, table: &str, key: String) -> Result<Arc<TableSchema>, Error> {
		let columns = self.store.describe(table).await?;
		let schema = Arc::new(TableSchema::new(table, columns));
		self.cells.write().await.insert(key, schema.clone());
		Ok(schema)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn column(field: &str, sql_type: &str, key: &str) -> ColumnDescriptor {
		ColumnDescriptor::from_metadata(field, sql_type, "NO", key, "")
	}

	#[test]
	fn metadata_flags() {
		let id = ColumnDescriptor::from_metadata("Member_id", "int", "NO", "PRI", "auto_increment");
		assert!(id.primary_key && id.auto_generated && !id.nullable);

		let email = ColumnDescriptor::from_metadata("Email", "varchar(100)", "YES", "", "");
		assert!(email.nullable && !email.primary_key && !email.auto_generated);
		assert_eq!(email.enum_values, None);
	}

	#[test]
	fn enum_literals() {
		assert_eq!(
			parse_enum_values("enum('booked','cancelled')"),
			Some(vec!["booked".to_string(), "cancelled".to_string()])
		);
		assert_eq!(parse_enum_values("ENUM('a')"), Some(vec!["a".to_string()]));
		assert_eq!(parse_enum_values("enum('it''s','fine')"), Some(vec!["it's".to_string(), "fine".to_string()]));
		assert_eq!(parse_enum_values("varchar(20)"), None);
	}

	#[test]
	fn first_primary_key_wins() {
		let schema = TableSchema::new(
			"tournament_entry",
			vec![column("Tournament_id", "int", "PRI"), column("Member_id", "int", "PRI")],
		);
		assert_eq!(schema.primary_key().unwrap().field, "Tournament_id");
		assert_eq!(schema.columns.iter().filter(|c| c.primary_key).count(), 1);
	}

	#[test]
	fn no_primary_key_is_allowed() {
		let schema = TableSchema::new("audit_log", vec![column("Message", "text", "")]);
		assert!(schema.primary_key().is_none());
	}

	#[test]
	fn column_lookup_ignores_case() {
		let schema = TableSchema::new("member", vec![column("Member_id", "int", "PRI")]);
		assert!(schema.column("member_ID").is_some());
		assert!(schema.column("missing").is_none());
	}
}
