use crate::{
	error::{Action, Error},
	policy::{self, Role, MEMBER_TABLE},
	store::{Record, Store},
};
use log::info;
use serde_json::Value;

const MEMBER_PK: &str = "Member_id";
const PLAN_FIELD: &str = "Plan_id";

/// Wholesale replace of a member's plan reference; `None` clears it.
/// Employee-only, re-checked here even though the UI hides the control
/// from everyone else. Whether the plan id references a real plan is the
/// store's referential constraint to enforce. Two employees racing on
/// the same member is last-write-wins.
pub async fn assign_plan(store: &dyn Store, role: Role, member_id: i64, plan_id: Option<i64>) -> Result<(), Error> {
	if !policy::decide(MEMBER_TABLE, role).can_assign_plan {
		return Err(Error::denied(MEMBER_TABLE, role, Action::AssignPlan));
	}

	let mut fields = Record::new();
	fields.insert(PLAN_FIELD.into(), plan_id.map(Value::from).unwrap_or(Value::Null));
	let affected = store.update(MEMBER_TABLE, MEMBER_PK, &Value::from(member_id), &fields).await?;
	if affected == 0 {
		return Err(Error::not_found(MEMBER_TABLE, member_id));
	}
	match plan_id {
		Some(plan) => info!("member {member_id} assigned to plan {plan}"),
		None => info!("member {member_id} plan cleared"),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{schema::ColumnDescriptor, store::memory::MemoryStore};
	use serde_json::{json, Map};

	fn member_store() -> MemoryStore {
		let store = MemoryStore::new();
		store.create_table(
			MEMBER_TABLE,
			vec![
				ColumnDescriptor::from_metadata(MEMBER_PK, "int", "NO", "PRI", "auto_increment"),
				ColumnDescriptor::from_metadata("Name", "varchar(50)", "NO", "", ""),
				ColumnDescriptor::from_metadata(PLAN_FIELD, "int", "YES", "", ""),
			],
		);
		let mut row = Map::new();
		row.insert(MEMBER_PK.into(), json!(7));
		row.insert("Name".into(), json!("A. Golfer"));
		row.insert(PLAN_FIELD.into(), json!(1));
		store.seed(MEMBER_TABLE, vec![row]);
		store
	}

	#[tokio::test]
	async fn replaces_and_clears() {
		let store = member_store();
		assign_plan(&store, Role::Employee, 7, Some(3)).await.unwrap();
		let row = store.select_one(MEMBER_TABLE, MEMBER_PK, &json!(7)).await.unwrap().unwrap();
		assert_eq!(row.get(PLAN_FIELD), Some(&json!(3)));

		assign_plan(&store, Role::Employee, 7, None).await.unwrap();
		let row = store.select_one(MEMBER_TABLE, MEMBER_PK, &json!(7)).await.unwrap().unwrap();
		assert_eq!(row.get(PLAN_FIELD), Some(&Value::Null));
	}

	#[tokio::test]
	async fn employee_only() {
		let store = member_store();
		for role in [Role::Admin, Role::Member] {
			let err = assign_plan(&store, role, 7, Some(3)).await.unwrap_err();
			assert!(matches!(err, Error::PermissionDenied { .. }), "{err}");
		}
		assert_eq!(store.mutations(), 0);
	}

	#[tokio::test]
	async fn unknown_member_is_not_found() {
		let store = member_store();
		let err = assign_plan(&store, Role::Employee, 99, Some(3)).await.unwrap_err();
		assert!(matches!(err, Error::NotFound { .. }));
	}
}
