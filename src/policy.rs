use crate::{schema::ColumnDescriptor, store::Record};
use phf::{phf_set, Set};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MEMBER_TABLE: &str = "member";
pub const EMPLOYEE_TABLE: &str = "employee";
pub const USER_TABLE: &str = "user_account";

// rows in these tables are created by the engine or by signup, never from a form
static NO_ADD: Set<&'static str> = phf_set! {
	"user_account",
	"booking",
	"equipment_rental",
	"tournament_entry",
};

// identity and join tables are never edited through the generic browser
static NO_EDIT: Set<&'static str> = phf_set! {
	"member",
	"employee",
	"user_account",
	"tournament_entry",
};

// course layout and the tee sheet are configuration; only admins touch them
static ADMIN_EDIT: Set<&'static str> = phf_set! {
	"course",
	"hole",
	"tee_time",
};

static NO_DELETE: Set<&'static str> = phf_set! {
	"member",
	"employee",
	"user_account",
	"course",
	"membership_plan",
	"equipment_type",
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Admin,
	Employee,
	Member,
}

impl Role {
	pub const ALL: [Role; 3] = [Role::Admin, Role::Employee, Role::Member];

	pub fn parse(s: &str) -> Option<Role> {
		match s.to_ascii_lowercase().as_str() {
			"admin" => Some(Role::Admin),
			"employee" => Some(Role::Employee),
			"member" => Some(Role::Member),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Admin => "admin",
			Role::Employee => "employee",
			Role::Member => "member",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct PermissionDecision {
	pub can_add: bool,
	pub can_edit: bool,
	pub can_delete: bool,
	pub can_view_actions: bool,
	pub can_assign_plan: bool,
}

/// The whole ruleset in one place. Pure: same (table, role) in, same
/// decision out. Table names compare case-insensitively.
pub fn decide(table: &str, role: Role) -> PermissionDecision {
	let table = table.to_ascii_lowercase();
	let t = table.as_str();

	let can_view_actions = if t == MEMBER_TABLE && role == Role::Admin {
		// admins browse member rows but never mutate them directly
		false
	} else if t == EMPLOYEE_TABLE {
		matches!(role, Role::Admin | Role::Employee)
	} else {
		true
	};

	let can_edit = if NO_EDIT.contains(t) {
		false
	} else if ADMIN_EDIT.contains(t) {
		role == Role::Admin
	} else {
		true
	};

	PermissionDecision {
		can_add: !NO_ADD.contains(t),
		can_edit,
		can_delete: !NO_DELETE.contains(t),
		can_view_actions,
		can_assign_plan: t == MEMBER_TABLE && role == Role::Employee,
	}
}

/// Whether a table shows up in the caller's table listing at all.
pub fn visible(table: &str, role: Role) -> bool {
	let table = table.to_ascii_lowercase();
	let t = table.as_str();
	match role {
		Role::Admin => true,
		Role::Employee => t != USER_TABLE,
		Role::Member => t != USER_TABLE && t != EMPLOYEE_TABLE && t != MEMBER_TABLE,
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct RowActions {
	pub can_edit: bool,
	pub can_delete: bool,
}

/// Row-level gate: a record that is missing its primary-key value cannot be
/// addressed, so edit/delete are off for that row no matter what the table
/// decision says.
pub fn row_actions(decision: &PermissionDecision, record: &Record, pk: Option<&ColumnDescriptor>) -> RowActions {
	let addressable = match pk {
		Some(pk) => record.get(&pk.field).map(|v| !v.is_null()).unwrap_or(false),
		None => false,
	};
	RowActions {
		can_edit: decision.can_edit && addressable,
		can_delete: decision.can_delete && addressable,
	}
}
