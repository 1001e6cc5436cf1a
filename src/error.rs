use crate::policy::Role;
use serde::Serialize;
use thiserror::Error;

/// Everything the engine can fail with. `CapacityExceeded` is its own
/// variant so callers can say "fully booked" instead of "something broke".
#[derive(Debug, Error)]
pub enum Error {
	#[error("table `{table}` is unavailable: {reason}")]
	SchemaUnavailable { table: String, reason: String },

	#[error("validation failed: {}", .0.join(", "))]
	Validation(Vec<String>),

	#[error("{0}")]
	Constraint(String),

	#[error("no `{table}` record with id {id}")]
	NotFound { table: String, id: String },

	#[error("no capacity left for {resource}")]
	CapacityExceeded { resource: String },

	#[error("role {role} may not {action} on `{table}`")]
	PermissionDenied { table: String, role: Role, action: Action },

	#[error("table `{table}` has no primary key; record operations are disabled")]
	MissingPrimaryKey { table: String },

	#[error("operation declined by the operator")]
	Declined,

	#[error("store error: {0}")]
	Store(String),
}

impl Error {
	pub fn schema_unavailable(table: &str, reason: impl Into<String>) -> Self {
		Self::SchemaUnavailable { table: table.into(), reason: reason.into() }
	}

	pub fn not_found(table: &str, id: impl ToString) -> Self {
		Self::NotFound { table: table.into(), id: id.to_string() }
	}

	pub fn denied(table: &str, role: Role, action: Action) -> Self {
		Self::PermissionDenied { table: table.into(), role, action }
	}

	pub fn store(reason: impl Into<String>) -> Self {
		Self::Store(reason.into())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
	Add,
	Edit,
	Delete,
	AssignPlan,
}

impl std::fmt::Display for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Action::Add => "add",
			Action::Edit => "edit",
			Action::Delete => "delete",
			Action::AssignPlan => "assign a plan",
		};
		f.write_str(s)
	}
}
