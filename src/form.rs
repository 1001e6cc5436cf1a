use crate::{
	error::Error,
	schema::{ColumnDescriptor, TableSchema},
	store::{values_match, Record},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Widget {
	Text,
	TextArea,
	Number { integer: bool },
	Date,
	Time,
	DateTime,
	Select { options: Vec<String> },
	YesNo,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormMode {
	Create,
	Edit,
}

/// One input of a generated form, with the value already coerced to the
/// widget's editing representation (empty string when blank).
#[derive(Clone, Debug, Serialize)]
pub struct FieldSpec {
	pub name: String,
	pub widget: Widget,
	pub required: bool,
	pub read_only: bool,
	pub value: String,
}

pub fn widget_for(column: &ColumnDescriptor) -> Widget {
	if let Some(values) = &column.enum_values {
		return Widget::Select { options: values.clone() };
	}
	let ty = column.sql_type.to_ascii_lowercase();
	if ty.starts_with("tinyint(1)") || ty.starts_with("bit(1)") || ty.starts_with("bool") {
		return Widget::YesNo;
	}
	if ty.contains("text") {
		return Widget::TextArea;
	}
	if ty.starts_with("datetime") || ty.starts_with("timestamp") {
		return Widget::DateTime;
	}
	if ty.starts_with("date") {
		return Widget::Date;
	}
	if ty.starts_with("time") {
		return Widget::Time;
	}
	for prefix in ["tinyint", "smallint", "mediumint", "int", "bigint"] {
		if ty.starts_with(prefix) {
			return Widget::Number { integer: true };
		}
	}
	for prefix in ["decimal", "numeric", "float", "double"] {
		if ty.starts_with(prefix) {
			return Widget::Number { integer: false };
		}
	}
	Widget::Text
}

/// Derives the form for a table. On create the auto-generated primary key
/// is omitted entirely; on edit the primary key renders read-only and the
/// record's stored values are converted to editing format.
pub fn form_fields(schema: &TableSchema, mode: FormMode, record: Option<&Record>) -> Vec<FieldSpec> {
	let mut fields = Vec::new();
	for column in &schema.columns {
		if mode == FormMode::Create && column.primary_key && column.auto_generated {
			continue;
		}
		let read_only = mode == FormMode::Edit && column.primary_key;
		let widget = widget_for(column);
		let required = !column.nullable && !column.auto_generated && !read_only;
		let value = record
			.and_then(|r| r.get(&column.field))
			.map(|v| display_value(&widget, v))
			.unwrap_or_default();
		fields.push(FieldSpec { name: column.field.clone(), widget, required, read_only, value });
	}
	fields
}

/// Stored representation -> editing representation.
pub fn display_value(widget: &Widget, stored: &Value) -> String {
	if stored.is_null() {
		return String::new();
	}
	let raw = raw_string(stored);
	match widget {
		Widget::Date => parse_date(&raw).map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or(raw),
		Widget::Time => parse_time(&raw).map(|t| t.format("%H:%M:%S").to_string()).unwrap_or(raw),
		Widget::DateTime => parse_datetime(&raw).map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()).unwrap_or(raw),
		Widget::YesNo => if truthy(stored) { "1".into() } else { "0".into() },
		_ => raw,
	}
}

fn raw_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Bool(true) => "1".into(),
		Value::Bool(false) => "0".into(),
		other => other.to_string(),
	}
}

fn truthy(value: &Value) -> bool {
	match value {
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
		Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes"),
		_ => false,
	}
}

/// Validates and coerces one submitted form. Every problem is gathered so
/// the operator sees the whole list at once; a failed submission never
/// reaches the store. Cleared nullable fields become explicit nulls so
/// that clearing is distinguishable from not touching.
pub fn collect(fields: &[FieldSpec], inputs: &HashMap<String, String>) -> Result<Record, Error> {
	let mut record = Record::new();
	let mut problems = Vec::new();
	for field in fields {
		if field.read_only {
			continue;
		}
		let raw = inputs.get(&field.name).map(|s| s.trim()).unwrap_or("");
		if raw.is_empty() {
			if field.required {
				problems.push(format!("{} is required", field.name));
			} else {
				record.insert(field.name.clone(), Value::Null);
			}
			continue;
		}
		match parse_input(&field.widget, raw) {
			Ok(value) => {
				record.insert(field.name.clone(), value);
			},
			Err(problem) => problems.push(format!("{} {}", field.name, problem)),
		}
	}
	if problems.is_empty() {
		Ok(record)
	} else {
		Err(Error::Validation(problems))
	}
}

/// Editing representation -> stored representation.
fn parse_input(widget: &Widget, raw: &str) -> Result<Value, String> {
	match widget {
		Widget::Text | Widget::TextArea => Ok(Value::from(raw)),
		Widget::Number { integer: true } => raw.parse::<i64>().map(Value::from).map_err(|_| "must be an integer".into()),
		Widget::Number { integer: false } => raw.parse::<f64>().map(Value::from).map_err(|_| "must be a number".into()),
		Widget::Date => parse_date(raw)
			.map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
			.ok_or_else(|| "must be a date (YYYY-MM-DD)".into()),
		Widget::Time => parse_time(raw)
			.map(|t| Value::from(t.format("%H:%M:%S").to_string()))
			.ok_or_else(|| "must be a time (HH:MM:SS)".into()),
		Widget::DateTime => parse_datetime(raw)
			.map(|t| Value::from(t.format("%Y-%m-%d %H:%M:%S").to_string()))
			.ok_or_else(|| "must be a date and time".into()),
		Widget::Select { options } => {
			if options.iter().any(|o| o == raw) {
				Ok(Value::from(raw))
			} else {
				Err(format!("must be one of: {}", options.join(", ")))
			}
		},
		Widget::YesNo => match raw.to_ascii_lowercase().as_str() {
			"1" | "y" | "yes" | "true" => Ok(Value::from(1)),
			"0" | "n" | "no" | "false" => Ok(Value::from(0)),
			_ => Err("must be yes or no".into()),
		},
	}
}

fn parse_date(s: &str) -> Option<NaiveDate> {
	if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
		return Some(dt.date_naive());
	}
	for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
		if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
			return Some(dt.date());
		}
	}
	NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
	for fmt in ["%H:%M:%S", "%H:%M"] {
		if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
			return Some(t);
		}
	}
	parse_datetime(s).map(|dt| dt.time())
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
	if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
		return Some(dt.naive_utc());
	}
	for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
		if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
			return Some(dt);
		}
	}
	let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
	date.and_hms_opt(0, 0, 0)
}

/// The changed-field subset of a submitted form against the fetched
/// record. An untouched form yields an empty delta; cleared fields stay
/// in (as nulls) because clearing is a change.
pub fn delta(original: &Record, submitted: &Record) -> Record {
	let mut changed = Record::new();
	for (name, value) in submitted {
		let before = original.get(name).unwrap_or(&Value::Null);
		if !same_value(before, value) {
			changed.insert(name.clone(), value.clone());
		}
	}
	changed
}

fn same_value(a: &Value, b: &Value) -> bool {
	let normalize = |v: &Value| match v {
		Value::Bool(true) => Value::from(1),
		Value::Bool(false) => Value::from(0),
		other => other.clone(),
	};
	values_match(&normalize(a), &normalize(b))
}
