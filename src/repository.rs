use crate::{
	error::{Action, Error},
	policy::{self, PermissionDecision, Role},
	schema::{ColumnDescriptor, SchemaCache, TableSchema},
	store::{Record, Store},
};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Operator confirmation seam. Mutations ask the gate before anything is
/// issued; a declined gate means nothing reaches the store.
#[async_trait]
pub trait Gate: Send + Sync {
	async fn confirm(&self, action: &str) -> bool;
}

/// Gate that never says no, for tests and non-interactive callers that
/// confirm upstream.
pub struct AutoConfirm;

#[async_trait]
impl Gate for AutoConfirm {
	async fn confirm(&self, _action: &str) -> bool {
		true
	}
}

/// Everything one table view needs, resolved once at open: no ambient
/// "current table" state anywhere else.
#[derive(Debug)]
pub struct TableContext {
	pub table: String,
	pub role: Role,
	pub schema: Arc<TableSchema>,
	pub decision: PermissionDecision,
}

impl TableContext {
	pub fn primary_key(&self) -> Result<&ColumnDescriptor, Error> {
		self.schema.primary_key().ok_or_else(|| Error::MissingPrimaryKey { table: self.table.clone() })
	}

	/// Coerces a raw id (prompt input, querystring) to the key column's type.
	pub fn id_value(&self, raw: &str) -> Result<Value, Error> {
		let pk = self.primary_key()?;
		let ty = pk.sql_type.to_ascii_lowercase();
		let numeric = ["tinyint", "smallint", "mediumint", "int", "bigint"].iter().any(|p| ty.starts_with(p));
		if numeric {
			raw.parse::<i64>()
				.map(Value::from)
				.map_err(|_| Error::Validation(vec![format!("{} must be an integer", pk.field)]))
		} else {
			Ok(Value::from(raw))
		}
	}
}

/// Generic record CRUD over one backing store, with the role's permission
/// decision re-checked at every operation boundary.
pub struct Repository {
	store: Arc<dyn Store>,
	schemas: SchemaCache,
	gate: Arc<dyn Gate>,
}

impl Repository {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { schemas: SchemaCache::new(store.clone()), store, gate: Arc::new(AutoConfirm) }
	}

	pub fn with_gate(mut self, gate: Arc<dyn Gate>) -> Self {
		self.gate = gate;
		self
	}

	pub fn store(&self) -> Arc<dyn Store> {
		self.store.clone()
	}

	/// (Re)opens a table view: re-describes the table and computes the
	/// role's decision. A table without a primary key still opens — only
	/// record-addressed operations are off.
	pub async fn open_table(&self, table: &str, role: Role) -> Result<TableContext, Error> {
		let schema = self.schemas.refresh(table).await?;
		if schema.primary_key().is_none() {
			warn!("table `{table}` has no primary key; edit and delete are disabled");
		}
		Ok(TableContext { table: table.to_string(), role, schema, decision: policy::decide(table, role) })
	}

	pub async fn visible_tables(&self, role: Role) -> Result<Vec<String>, Error> {
		Ok(self.store.tables().await?.into_iter().filter(|t| policy::visible(t, role)).collect())
	}

	pub async fn list(&self, ctx: &TableContext) -> Result<Vec<Record>, Error> {
		self.store.select_all(&ctx.table).await
	}

	pub async fn list_where(&self, ctx: &TableContext, field: &str, value: &Value) -> Result<Vec<Record>, Error> {
		self.store.select_where(&ctx.table, field, value).await
	}

	pub async fn fetch_one(&self, ctx: &TableContext, id: &Value) -> Result<Record, Error> {
		let pk = ctx.primary_key()?;
		self.store
			.select_one(&ctx.table, &pk.field, id)
			.await?
			.ok_or_else(|| Error::not_found(&ctx.table, id))
	}

	pub async fn create(&self, ctx: &TableContext, fields: &Record) -> Result<u64, Error> {
		if !ctx.decision.can_add {
			return Err(Error::denied(&ctx.table, ctx.role, Action::Add));
		}
		self.confirm(&format!("add a `{}` record", ctx.table)).await?;
		let id = self.store.insert(&ctx.table, fields).await?;
		info!("created `{}` record {id}", ctx.table);
		Ok(id)
	}

	/// An empty delta is a successful no-op: nothing to confirm, nothing
	/// to write.
	pub async fn update(&self, ctx: &TableContext, id: &Value, delta: &Record) -> Result<u64, Error> {
		if !ctx.decision.can_edit {
			return Err(Error::denied(&ctx.table, ctx.role, Action::Edit));
		}
		let pk = ctx.primary_key()?;
		if delta.is_empty() {
			debug!("empty delta for `{}` {id}; nothing to write", ctx.table);
			return Ok(0);
		}
		self.confirm(&format!("update `{}` record {id}", ctx.table)).await?;
		let affected = self.store.update(&ctx.table, &pk.field, id, delta).await?;
		info!("updated `{}` record {id} ({affected} affected)", ctx.table);
		Ok(affected)
	}

	/// Reports `NotFound` when nothing matched; callers are expected to
	/// treat that as already-deleted, not as a hard failure.
	pub async fn delete(&self, ctx: &TableContext, id: &Value) -> Result<u64, Error> {
		if !ctx.decision.can_delete {
			return Err(Error::denied(&ctx.table, ctx.role, Action::Delete));
		}
		let pk = ctx.primary_key()?;
		self.confirm(&format!("delete `{}` record {id}", ctx.table)).await?;
		let affected = self.store.delete(&ctx.table, &pk.field, id).await?;
		if affected == 0 {
			return Err(Error::not_found(&ctx.table, id));
		}
		info!("deleted `{}` record {id}", ctx.table);
		Ok(affected)
	}

	async fn confirm(&self, action: &str) -> Result<(), Error> {
		if self.gate.confirm(action).await {
			Ok(())
		} else {
			Err(Error::Declined)
		}
	}
}
