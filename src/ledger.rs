use crate::{
	error::Error,
	store::{values_match, Record, Store},
};
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

const TEE_TIME: &str = "tee_time";
const TEE_PK: &str = "Tee_time_id";
const BOOKED_SLOTS: &str = "Booked_slots";
const TOTAL_SLOTS: &str = "Total_slots";

const BOOKING: &str = "booking";
const BOOKING_PK: &str = "Booking_id";

const EQUIPMENT: &str = "equipment_type";
const EQUIPMENT_PK: &str = "Equipment_type";
const AVAILABLE_UNITS: &str = "Available_units";
const TOTAL_UNITS: &str = "Total_units";

const RENTAL: &str = "equipment_rental";
const RENTAL_PK: &str = "Rental_id";

#[derive(Clone, Debug)]
pub struct RentalLine {
	pub equipment_type: String,
	pub quantity: i64,
}

/// Capacity-bounded allocation for tee-time slots and equipment units.
/// Every capacity check-and-take is a single conditional store update;
/// every release is guarded by the row's current status so releasing
/// twice never gives capacity back twice.
pub struct Ledger {
	store: Arc<dyn Store>,
}

impl Ledger {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	/// Takes one seat on the slot, then records the booking. The seat is
	/// handed back if the booking row cannot be written.
	pub async fn book_tee_time(&self, member_id: i64, tee_time_id: i64) -> Result<u64, Error> {
		let slot = Value::from(tee_time_id);
		let taken = self.store.adjust_counter(TEE_TIME, TEE_PK, &slot, BOOKED_SLOTS, 1, Some(TOTAL_SLOTS)).await?;
		if taken == 0 {
			return match self.store.select_one(TEE_TIME, TEE_PK, &slot).await? {
				None => Err(Error::not_found(TEE_TIME, tee_time_id)),
				Some(_) => Err(Error::CapacityExceeded { resource: format!("tee time {tee_time_id}") }),
			};
		}

		let mut fields = Record::new();
		fields.insert("Member_id".into(), Value::from(member_id));
		fields.insert("Tee_time_id".into(), Value::from(tee_time_id));
		fields.insert("Status".into(), Value::from("booked"));
		match self.store.insert(BOOKING, &fields).await {
			Ok(booking_id) => {
				info!("member {member_id} booked tee time {tee_time_id} (booking {booking_id})");
				Ok(booking_id)
			},
			Err(err) => {
				if self.store.adjust_counter(TEE_TIME, TEE_PK, &slot, BOOKED_SLOTS, -1, None).await.is_err() {
					warn!("failed to hand back a seat on tee time {tee_time_id}");
				}
				Err(err)
			},
		}
	}

	/// Idempotent: cancelling an already-cancelled booking succeeds
	/// without releasing the seat a second time.
	pub async fn cancel_tee_time(&self, member_id: i64, tee_time_id: i64) -> Result<(), Error> {
		let member = Value::from(member_id);
		let bookings = self.store.select_where(BOOKING, "Tee_time_id", &Value::from(tee_time_id)).await?;
		let mine: Vec<&Record> = bookings
			.iter()
			.filter(|b| values_match(b.get("Member_id").unwrap_or(&Value::Null), &member))
			.collect();
		let Some(active) = mine.iter().find(|b| b.get("Status").and_then(Value::as_str) == Some("booked")) else {
			if mine.is_empty() {
				return Err(Error::not_found(BOOKING, format!("tee time {tee_time_id}, member {member_id}")));
			}
			debug!("booking for tee time {tee_time_id} already cancelled");
			return Ok(());
		};

		let booking_id = active.get(BOOKING_PK).cloned().unwrap_or(Value::Null);
		let mut fields = Record::new();
		fields.insert("Status".into(), Value::from("cancelled"));
		let mut expected = Record::new();
		expected.insert("Status".into(), Value::from("booked"));

		let flipped = self.store.update_guarded(BOOKING, BOOKING_PK, &booking_id, &fields, &expected).await?;
		if flipped == 1 {
			self.store
				.adjust_counter(TEE_TIME, TEE_PK, &Value::from(tee_time_id), BOOKED_SLOTS, -1, None)
				.await?;
			info!("member {member_id} cancelled tee time {tee_time_id}");
		}
		Ok(())
	}

	/// Each line is its own capacity check; if any line cannot be covered
	/// the whole request fails and every already-taken line is handed
	/// back, so counters end where they started.
	pub async fn rent_equipment(&self, member_id: i64, lines: &[RentalLine]) -> Result<Vec<u64>, Error> {
		let mut problems = Vec::new();
		if lines.is_empty() {
			problems.push("at least one rental line is required".to_string());
		}
		for line in lines {
			if line.quantity < 1 {
				problems.push(format!("quantity for {} must be at least 1", line.equipment_type));
			}
		}
		if !problems.is_empty() {
			return Err(Error::Validation(problems));
		}

		let mut taken: Vec<&RentalLine> = Vec::new();
		for line in lines {
			let key = Value::from(line.equipment_type.clone());
			let result = self
				.store
				.adjust_counter(EQUIPMENT, EQUIPMENT_PK, &key, AVAILABLE_UNITS, -line.quantity, None)
				.await;
			match result {
				Ok(affected) if affected > 0 => taken.push(line),
				Ok(_) => {
					self.release_lines(&taken).await;
					return match self.store.select_one(EQUIPMENT, EQUIPMENT_PK, &key).await? {
						None => Err(Error::not_found(EQUIPMENT, &line.equipment_type)),
						Some(_) => Err(Error::CapacityExceeded {
							resource: format!("{} x{}", line.equipment_type, line.quantity),
						}),
					};
				},
				Err(err) => {
					self.release_lines(&taken).await;
					return Err(err);
				},
			}
		}

		let today = Utc::now().format("%Y-%m-%d").to_string();
		let mut rental_ids = Vec::with_capacity(lines.len());
		for line in lines {
			let mut fields = Record::new();
			fields.insert("Member_id".into(), Value::from(member_id));
			fields.insert("Equipment_type".into(), Value::from(line.equipment_type.clone()));
			fields.insert("Quantity".into(), Value::from(line.quantity));
			fields.insert("Rental_date".into(), Value::from(today.clone()));
			fields.insert("Return_date".into(), Value::Null);
			fields.insert("Returned".into(), Value::from(0));
			match self.store.insert(RENTAL, &fields).await {
				Ok(id) => rental_ids.push(id),
				Err(err) => {
					for id in &rental_ids {
						let _ = self.store.delete(RENTAL, RENTAL_PK, &Value::from(*id)).await;
					}
					self.release_lines(&taken).await;
					return Err(err);
				},
			}
		}

		info!("member {member_id} rented {} line(s)", lines.len());
		Ok(rental_ids)
	}

	/// Idempotent: returning an already-returned rental succeeds without
	/// crediting the units a second time.
	pub async fn return_equipment(&self, rental_id: i64) -> Result<(), Error> {
		let id = Value::from(rental_id);
		let Some(rental) = self.store.select_one(RENTAL, RENTAL_PK, &id).await? else {
			return Err(Error::not_found(RENTAL, rental_id));
		};
		if is_set(rental.get("Returned")) {
			debug!("rental {rental_id} already returned");
			return Ok(());
		}

		let quantity = rental.get("Quantity").and_then(Value::as_i64).unwrap_or(1);
		let mut fields = Record::new();
		fields.insert("Returned".into(), Value::from(1));
		fields.insert("Return_date".into(), Value::from(Utc::now().format("%Y-%m-%d").to_string()));
		let mut expected = Record::new();
		expected.insert("Returned".into(), Value::from(0));

		let flipped = self.store.update_guarded(RENTAL, RENTAL_PK, &id, &fields, &expected).await?;
		if flipped == 1 {
			let key = rental.get("Equipment_type").cloned().unwrap_or(Value::Null);
			self.store
				.adjust_counter(EQUIPMENT, EQUIPMENT_PK, &key, AVAILABLE_UNITS, quantity, Some(TOTAL_UNITS))
				.await?;
			info!("rental {rental_id} returned ({quantity} unit(s))");
		}
		Ok(())
	}

	async fn release_lines(&self, taken: &[&RentalLine]) {
		for line in taken {
			let key = Value::from(line.equipment_type.clone());
			let result = self
				.store
				.adjust_counter(EQUIPMENT, EQUIPMENT_PK, &key, AVAILABLE_UNITS, line.quantity, Some(TOTAL_UNITS))
				.await;
			if result.is_err() {
				warn!("failed to hand back {} x{}", line.equipment_type, line.quantity);
			}
		}
	}
}

fn is_set(value: Option<&Value>) -> bool {
	match value {
		Some(Value::Bool(b)) => *b,
		Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
		Some(Value::String(s)) => s == "1",
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{schema::ColumnDescriptor, store::memory::MemoryStore};
	use serde_json::{json, Map};

	fn column(field: &str, sql_type: &str, null: &str, key: &str, extra: &str) -> ColumnDescriptor {
		ColumnDescriptor::from_metadata(field, sql_type, null, key, extra)
	}

	fn record(pairs: &[(&str, Value)]) -> Record {
		let mut map = Map::new();
		for (k, v) in pairs {
			map.insert(k.to_string(), v.clone());
		}
		map
	}

	fn club_store() -> Arc<MemoryStore> {
		let store = MemoryStore::new();
		store.create_table(
			TEE_TIME,
			vec![
				column(TEE_PK, "int", "NO", "PRI", "auto_increment"),
				column("Tee_date", "date", "NO", "", ""),
				column("Tee_off", "time", "NO", "", ""),
				column("Course_id", "int", "NO", "", ""),
				column(TOTAL_SLOTS, "int", "NO", "", ""),
				column(BOOKED_SLOTS, "int", "NO", "", ""),
			],
		);
		store.seed(
			TEE_TIME,
			vec![record(&[
				(TEE_PK, json!(1)),
				("Tee_date", json!("2024-06-01")),
				("Tee_off", json!("08:30:00")),
				("Course_id", json!(1)),
				(TOTAL_SLOTS, json!(4)),
				(BOOKED_SLOTS, json!(3)),
			])],
		);
		store.create_table(
			BOOKING,
			vec![
				column(BOOKING_PK, "int", "NO", "PRI", "auto_increment"),
				column("Member_id", "int", "NO", "", ""),
				column("Tee_time_id", "int", "NO", "", ""),
				column("Status", "enum('booked','cancelled')", "NO", "", ""),
			],
		);
		store.create_table(
			EQUIPMENT,
			vec![
				column(EQUIPMENT_PK, "varchar(30)", "NO", "PRI", ""),
				column(TOTAL_UNITS, "int", "NO", "", ""),
				column(AVAILABLE_UNITS, "int", "NO", "", ""),
			],
		);
		store.seed(
			EQUIPMENT,
			vec![
				record(&[(EQUIPMENT_PK, json!("Cart")), (TOTAL_UNITS, json!(5)), (AVAILABLE_UNITS, json!(2))]),
				record(&[(EQUIPMENT_PK, json!("Clubs")), (TOTAL_UNITS, json!(10)), (AVAILABLE_UNITS, json!(10))]),
			],
		);
		store.create_table(
			RENTAL,
			vec![
				column(RENTAL_PK, "int", "NO", "PRI", "auto_increment"),
				column("Member_id", "int", "NO", "", ""),
				column("Equipment_type", "varchar(30)", "NO", "", ""),
				column("Quantity", "int", "NO", "", ""),
				column("Rental_date", "date", "NO", "", ""),
				column("Return_date", "date", "YES", "", ""),
				column("Returned", "tinyint(1)", "NO", "", ""),
			],
		);
		Arc::new(store)
	}

	async fn booked_slots(store: &MemoryStore) -> i64 {
		let slot = store.select_one(TEE_TIME, TEE_PK, &json!(1)).await.unwrap().unwrap();
		slot.get(BOOKED_SLOTS).and_then(Value::as_i64).unwrap()
	}

	async fn available(store: &MemoryStore, kind: &str) -> i64 {
		let row = store.select_one(EQUIPMENT, EQUIPMENT_PK, &json!(kind)).await.unwrap().unwrap();
		row.get(AVAILABLE_UNITS).and_then(Value::as_i64).unwrap()
	}

	#[tokio::test]
	async fn booking_takes_the_last_seat_then_fails_full() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		ledger.book_tee_time(12, 1).await.unwrap();
		assert_eq!(booked_slots(&store).await, 4);

		let err = ledger.book_tee_time(13, 1).await.unwrap_err();
		assert!(matches!(err, Error::CapacityExceeded { .. }), "{err}");
		assert_eq!(booked_slots(&store).await, 4);
	}

	#[tokio::test]
	async fn booking_unknown_slot_is_not_found() {
		let ledger = Ledger::new(club_store());
		let err = ledger.book_tee_time(12, 99).await.unwrap_err();
		assert!(matches!(err, Error::NotFound { .. }), "{err}");
	}

	#[tokio::test]
	async fn cancel_twice_releases_once() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		ledger.book_tee_time(12, 1).await.unwrap();
		assert_eq!(booked_slots(&store).await, 4);

		ledger.cancel_tee_time(12, 1).await.unwrap();
		assert_eq!(booked_slots(&store).await, 3);
		ledger.cancel_tee_time(12, 1).await.unwrap();
		assert_eq!(booked_slots(&store).await, 3);
	}

	#[tokio::test]
	async fn cancel_without_booking_is_not_found() {
		let ledger = Ledger::new(club_store());
		let err = ledger.cancel_tee_time(12, 1).await.unwrap_err();
		assert!(matches!(err, Error::NotFound { .. }));
	}

	#[tokio::test]
	async fn rental_over_capacity_fails_whole() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		let lines = [RentalLine { equipment_type: "Cart".into(), quantity: 3 }];
		let err = ledger.rent_equipment(12, &lines).await.unwrap_err();
		assert!(matches!(err, Error::CapacityExceeded { .. }), "{err}");
		assert_eq!(available(&store, "Cart").await, 2);
	}

	#[tokio::test]
	async fn failing_line_rolls_back_earlier_lines() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		let lines = [
			RentalLine { equipment_type: "Clubs".into(), quantity: 4 },
			RentalLine { equipment_type: "Cart".into(), quantity: 3 },
		];
		let err = ledger.rent_equipment(12, &lines).await.unwrap_err();
		assert!(matches!(err, Error::CapacityExceeded { .. }));
		assert_eq!(available(&store, "Clubs").await, 10);
		assert_eq!(available(&store, "Cart").await, 2);
		assert!(store.select_all(RENTAL).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn rental_and_return_round_trip() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		let lines = [
			RentalLine { equipment_type: "Cart".into(), quantity: 2 },
			RentalLine { equipment_type: "Clubs".into(), quantity: 1 },
		];
		let ids = ledger.rent_equipment(12, &lines).await.unwrap();
		assert_eq!(ids.len(), 2);
		assert_eq!(available(&store, "Cart").await, 0);
		assert_eq!(available(&store, "Clubs").await, 9);

		ledger.return_equipment(ids[0] as i64).await.unwrap();
		assert_eq!(available(&store, "Cart").await, 2);

		// second return must not credit the carts again
		ledger.return_equipment(ids[0] as i64).await.unwrap();
		assert_eq!(available(&store, "Cart").await, 2);
	}

	#[tokio::test]
	async fn zero_quantity_is_rejected_before_any_write() {
		let store = club_store();
		let ledger = Ledger::new(store.clone());

		let lines = [RentalLine { equipment_type: "Cart".into(), quantity: 0 }];
		let err = ledger.rent_equipment(12, &lines).await.unwrap_err();
		assert!(matches!(err, Error::Validation(_)));
		assert_eq!(store.mutations(), 0);
	}
}
