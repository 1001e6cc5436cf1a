use crate::{
	error::Error,
	schema::ColumnDescriptor,
	store::{Record, Store},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::debug;
use serde_json::{Map, Value};
use sqlx::{
	mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow},
	query::Query,
	Column, MySql, Row, TypeInfo,
};

const DESCRIBE_SQL: &str = "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, EXTRA \
	FROM information_schema.columns \
	WHERE table_schema = DATABASE() AND table_name = ? \
	ORDER BY ORDINAL_POSITION";

/// MySQL backend. Identifiers are whitelisted before they are spliced into
/// SQL; every value travels as a bound parameter.
pub struct SqlStore {
	pool: MySqlPool,
}

impl SqlStore {
	pub async fn connect(url: &str) -> Result<Self, Error> {
		let pool = MySqlPoolOptions::new()
			.max_connections(5)
			.connect(url)
			.await
			.map_err(|e| Error::store(e.to_string()))?;
		Ok(Self { pool })
	}

	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

fn ident(name: &str) -> Result<&str, Error> {
	let ok = !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
	if ok {
		Ok(name)
	} else {
		Err(Error::store(format!("invalid identifier `{name}`")))
	}
}

fn bind_value<'q>(query: Query<'q, MySql, MySqlArguments>, value: &Value) -> Query<'q, MySql, MySqlArguments> {
	match value {
		Value::Null => query.bind(None::<String>),
		Value::Bool(b) => query.bind(*b),
		Value::Number(n) => match n.as_i64() {
			Some(i) => query.bind(i),
			None => query.bind(n.as_f64().unwrap_or(0.0)),
		},
		Value::String(s) => query.bind(s.clone()),
		other => query.bind(other.to_string()),
	}
}

fn decode(row: &MySqlRow, i: usize, type_name: &str) -> Result<Value, sqlx::Error> {
	let value = match type_name {
		"BOOLEAN" | "BIT" => row.try_get::<Option<bool>, _>(i)?.map(|b| Value::from(i64::from(b))),
		"TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
			row.try_get::<Option<i64>, _>(i)?.map(Value::from)
		},
		"TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
			row.try_get::<Option<u64>, _>(i)?.map(Value::from)
		},
		"FLOAT" | "DOUBLE" => row.try_get::<Option<f64>, _>(i)?.map(Value::from),
		"DATE" => row.try_get::<Option<NaiveDate>, _>(i)?.map(|d| Value::from(d.format("%Y-%m-%d").to_string())),
		"TIME" => row.try_get::<Option<NaiveTime>, _>(i)?.map(|t| Value::from(t.format("%H:%M:%S").to_string())),
		"DATETIME" => {
			row.try_get::<Option<NaiveDateTime>, _>(i)?.map(|t| Value::from(t.format("%Y-%m-%d %H:%M:%S").to_string()))
		},
		"TIMESTAMP" => row
			.try_get::<Option<DateTime<Utc>>, _>(i)?
			.map(|t| Value::from(t.format("%Y-%m-%d %H:%M:%S").to_string())),
		// DECIMAL, CHAR/VARCHAR/TEXT, ENUM, SET and anything unrecognized
		_ => row.try_get::<Option<String>, _>(i)?.map(Value::from),
	};
	Ok(value.unwrap_or(Value::Null))
}

fn row_to_record(row: &MySqlRow) -> Result<Record, Error> {
	let mut record = Map::new();
	for (i, column) in row.columns().iter().enumerate() {
		let value = decode(row, i, column.type_info().name()).map_err(|e| Error::store(e.to_string()))?;
		record.insert(column.name().to_string(), value);
	}
	Ok(record)
}

fn map_sql_error(table: &str, err: sqlx::Error) -> Error {
	if let sqlx::Error::Database(db) = &err {
		let message = db.message().to_string();
		return match db.code().as_deref() {
			// integrity violations: duplicate key, FK, NOT NULL
			Some(code) if code.starts_with("23") => Error::Constraint(message),
			// unknown column in a written field list
			Some("42S22") => Error::Constraint(message),
			Some("42S02") => Error::schema_unavailable(table, message),
			_ => Error::Store(message),
		};
	}
	Error::store(err.to_string())
}

#[async_trait]
impl Store for SqlStore {
	async fn tables(&self) -> Result<Vec<String>, Error> {
		let rows = sqlx::query("SHOW TABLES")
			.fetch_all(&self.pool)
			.await
			.map_err(|e| Error::store(e.to_string()))?;
		let mut names = Vec::with_capacity(rows.len());
		for row in rows {
			names.push(row.try_get::<String, _>(0).map_err(|e| Error::store(e.to_string()))?);
		}
		Ok(names)
	}

	async fn describe(&self, table: &str) -> Result<Vec<ColumnDescriptor>, Error> {
		let rows = sqlx::query(DESCRIBE_SQL)
			.bind(table)
			.fetch_all(&self.pool)
			.await
			.map_err(|e| map_sql_error(table, e))?;
		if rows.is_empty() {
			return Err(Error::schema_unavailable(table, "unknown table"));
		}
		let mut columns = Vec::with_capacity(rows.len());
		for row in rows {
			let get = |name: &str| row.try_get::<String, _>(name).map_err(|e| Error::store(e.to_string()));
			columns.push(ColumnDescriptor::from_metadata(
				&get("COLUMN_NAME")?,
				&get("COLUMN_TYPE")?,
				&get("IS_NULLABLE")?,
				&get("COLUMN_KEY")?,
				&get("EXTRA")?,
			));
		}
		Ok(columns)
	}

	async fn select_all(&self, table: &str) -> Result<Vec<Record>, Error> {
		let sql = format!("SELECT * FROM `{}`", ident(table)?);
		let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		rows.iter().map(row_to_record).collect()
	}

	async fn select_where(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>, Error> {
		let sql = format!("SELECT * FROM `{}` WHERE `{}` = ?", ident(table)?, ident(field)?);
		let query = bind_value(sqlx::query(&sql), value);
		let rows = query.fetch_all(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		rows.iter().map(row_to_record).collect()
	}

	async fn select_one(&self, table: &str, pk: &str, id: &Value) -> Result<Option<Record>, Error> {
		let sql = format!("SELECT * FROM `{}` WHERE `{}` = ? LIMIT 1", ident(table)?, ident(pk)?);
		let query = bind_value(sqlx::query(&sql), id);
		let row = query.fetch_optional(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		row.as_ref().map(row_to_record).transpose()
	}

	async fn insert(&self, table: &str, fields: &Record) -> Result<u64, Error> {
		let mut names = Vec::with_capacity(fields.len());
		let mut placeholders = Vec::with_capacity(fields.len());
		for field in fields.keys() {
			names.push(format!("`{}`", ident(field)?));
			placeholders.push("?");
		}
		let sql = format!("INSERT INTO `{}` ({}) VALUES ({})", ident(table)?, names.join(", "), placeholders.join(", "));
		debug!("{sql}");

		let mut query = sqlx::query(&sql);
		for value in fields.values() {
			query = bind_value(query, value);
		}
		let result = query.execute(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		Ok(result.last_insert_id())
	}

	async fn update(&self, table: &str, pk: &str, id: &Value, fields: &Record) -> Result<u64, Error> {
		let mut sets = Vec::with_capacity(fields.len());
		for field in fields.keys() {
			sets.push(format!("`{}` = ?", ident(field)?));
		}
		let sql = format!("UPDATE `{}` SET {} WHERE `{}` = ?", ident(table)?, sets.join(", "), ident(pk)?);
		debug!("{sql}");

		let mut query = sqlx::query(&sql);
		for value in fields.values() {
			query = bind_value(query, value);
		}
		query = bind_value(query, id);
		let result = query.execute(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		Ok(result.rows_affected())
	}

	async fn delete(&self, table: &str, pk: &str, id: &Value) -> Result<u64, Error> {
		let sql = format!("DELETE FROM `{}` WHERE `{}` = ?", ident(table)?, ident(pk)?);
		debug!("{sql}");
		let query = bind_value(sqlx::query(&sql), id);
		let result = query.execute(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		Ok(result.rows_affected())
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
		// the capacity check and the write are one conditional statement
		let mut sql = format!(
			"UPDATE `{}` SET `{c}` = `{c}` + ? WHERE `{}` = ? AND `{c}` + ? >= 0",
			ident(table)?,
			ident(pk)?,
			c = ident(column)?,
		);
		if let Some(ceiling) = ceiling {
			sql.push_str(&format!(" AND `{}` + ? <= `{}`", ident(column)?, ident(ceiling)?));
		}
		debug!("{sql}");

		let mut query = sqlx::query(&sql).bind(delta);
		query = bind_value(query, id);
		query = query.bind(delta);
		if ceiling.is_some() {
			query = query.bind(delta);
		}
		let result = query.execute(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		Ok(result.rows_affected())
	}

	async fn update_guarded(
		&self,
		table: &str,
		pk: &str,
		id: &Value,
		fields: &Record,
		expected: &Record,
	) -> Result<u64, Error> {
		let mut sets = Vec::with_capacity(fields.len());
		for field in fields.keys() {
			sets.push(format!("`{}` = ?", ident(field)?));
		}
		let mut sql = format!("UPDATE `{}` SET {} WHERE `{}` = ?", ident(table)?, sets.join(", "), ident(pk)?);
		for (field, value) in expected {
			if value.is_null() {
				sql.push_str(&format!(" AND `{}` IS NULL", ident(field)?));
			} else {
				sql.push_str(&format!(" AND `{}` = ?", ident(field)?));
			}
		}
		debug!("{sql}");

		let mut query = sqlx::query(&sql);
		for value in fields.values() {
			query = bind_value(query, value);
		}
		query = bind_value(query, id);
		for value in expected.values() {
			if !value.is_null() {
				query = bind_value(query, value);
			}
		}
		let result = query.execute(&self.pool).await.map_err(|e| map_sql_error(table, e))?;
		Ok(result.rows_affected())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identifiers_are_whitelisted() {
		assert!(ident("tee_time").is_ok());
		assert!(ident("Booked_slots").is_ok());
		assert!(ident("bad-name").is_err());
		assert!(ident("drop table x; --").is_err());
		assert!(ident("").is_err());
	}
}
