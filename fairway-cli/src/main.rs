use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use fairway::{
	form::{self, FormMode},
	plan,
	store::sql::SqlStore,
	Error, Gate, Ledger, RentalLine, Repository, Role,
};
use std::{
	collections::HashMap,
	env,
	io::{self, BufRead, Write},
	sync::Arc,
};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
	/// role attached to this session
	#[clap(long, default_value = "member")]
	role: String,

	/// answer yes to every confirmation prompt
	#[clap(long)]
	yes: bool,

	#[clap(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// List the tables this role may browse
	Tables,
	/// Show a table's column metadata
	Structure { table: String },
	/// List every record of a table
	List { table: String },
	/// Fetch one record by primary key
	Show { table: String, id: String },
	/// Add a record; fields as name=value pairs
	Add { table: String, fields: Vec<String> },
	/// Edit a record; only the given name=value pairs change
	Edit { table: String, id: String, fields: Vec<String> },
	/// Delete a record by primary key
	Delete { table: String, id: String },
	/// Book a tee time for a member
	Book { member_id: i64, tee_time_id: i64 },
	/// Cancel a member's tee-time booking
	Cancel { member_id: i64, tee_time_id: i64 },
	/// Rent equipment; lines as type=quantity pairs
	Rent { member_id: i64, lines: Vec<String> },
	/// Return a rental
	Return { rental_id: i64 },
	/// Assign a membership plan (omit the plan id to clear it)
	AssignPlan { member_id: i64, plan_id: Option<i64> },
}

struct StdinGate {
	assume_yes: bool,
}

#[async_trait]
impl Gate for StdinGate {
	async fn confirm(&self, action: &str) -> bool {
		if self.assume_yes {
			return true;
		}
		print!("About to {action}. Continue? [y/N] ");
		io::stdout().flush().ok();
		let mut line = String::new();
		if io::stdin().lock().read_line(&mut line).is_err() {
			return false;
		}
		matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	env_logger::init();

	let cli = Cli::parse();

	dotenv().ok();

	let role = Role::parse(&cli.role).ok_or_else(|| anyhow!("unknown role `{}`", cli.role))?;
	let database_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set");
	let store = Arc::new(SqlStore::connect(&database_url).await?);
	let gate = Arc::new(StdinGate { assume_yes: cli.yes });
	let repo = Repository::new(store).with_gate(gate.clone());
	let ledger = Ledger::new(repo.store());

	match cli.command {
		Commands::Tables => {
			for table in repo.visible_tables(role).await? {
				println!("{table}");
			}
		},
		Commands::Structure { table } => {
			let ctx = repo.open_table(&table, role).await?;
			println!("{:<24} {:<28} {:<8} key", "field", "type", "null");
			for column in &ctx.schema.columns {
				let mut flags = String::new();
				if column.primary_key {
					flags.push_str("PRI");
				}
				if column.auto_generated {
					flags.push_str(" auto");
				}
				println!(
					"{:<24} {:<28} {:<8} {}",
					column.field,
					column.sql_type,
					if column.nullable { "YES" } else { "NO" },
					flags.trim(),
				);
			}
		},
		Commands::List { table } => {
			let ctx = repo.open_table(&table, role).await?;
			let rows = repo.list(&ctx).await?;
			println!("{}", serde_json::to_string_pretty(&rows)?);
		},
		Commands::Show { table, id } => {
			let ctx = repo.open_table(&table, role).await?;
			let id = ctx.id_value(&id)?;
			let row = repo.fetch_one(&ctx, &id).await?;
			println!("{}", serde_json::to_string_pretty(&row)?);
		},
		Commands::Add { table, fields } => {
			let ctx = repo.open_table(&table, role).await?;
			let inputs: HashMap<String, String> = parse_pairs(&fields)?.into_iter().collect();
			let specs = form::form_fields(&ctx.schema, FormMode::Create, None);
			let record = form::collect(&specs, &inputs)?;
			let id = repo.create(&ctx, &record).await?;
			println!("Record added (id {id}).");
		},
		Commands::Edit { table, id, fields } => {
			let ctx = repo.open_table(&table, role).await?;
			let id = ctx.id_value(&id)?;
			let original = repo.fetch_one(&ctx, &id).await?;
			let specs = form::form_fields(&ctx.schema, FormMode::Edit, Some(&original));

			// the form arrives prefilled; the given pairs overwrite it
			let mut inputs: HashMap<String, String> =
				specs.iter().map(|f| (f.name.clone(), f.value.clone())).collect();
			for (name, value) in parse_pairs(&fields)? {
				inputs.insert(name, value);
			}

			let submitted = form::collect(&specs, &inputs)?;
			let delta = form::delta(&original, &submitted);
			if delta.is_empty() {
				repo.update(&ctx, &id, &delta).await?;
				println!("No changes.");
			} else {
				let affected = repo.update(&ctx, &id, &delta).await?;
				println!("Record updated ({affected} affected).");
			}
		},
		Commands::Delete { table, id } => {
			let ctx = repo.open_table(&table, role).await?;
			let id = ctx.id_value(&id)?;
			match repo.delete(&ctx, &id).await {
				Ok(_) => println!("Record deleted."),
				Err(Error::NotFound { .. }) => println!("Record was already deleted."),
				Err(err) => return Err(err.into()),
			}
		},
		Commands::Book { member_id, tee_time_id } => {
			if !gate.confirm(&format!("book tee time {tee_time_id} for member {member_id}")).await {
				println!("Aborted.");
				return Ok(());
			}
			match ledger.book_tee_time(member_id, tee_time_id).await {
				Ok(booking_id) => println!("Tee time booked (booking {booking_id})."),
				Err(Error::CapacityExceeded { .. }) => println!("That tee time is fully booked."),
				Err(err) => return Err(err.into()),
			}
		},
		Commands::Cancel { member_id, tee_time_id } => {
			if !gate.confirm(&format!("cancel tee time {tee_time_id} for member {member_id}")).await {
				println!("Aborted.");
				return Ok(());
			}
			ledger.cancel_tee_time(member_id, tee_time_id).await?;
			println!("Booking cancelled.");
		},
		Commands::Rent { member_id, lines } => {
			let lines = parse_lines(&lines)?;
			if !gate.confirm(&format!("rent {} equipment line(s) for member {member_id}", lines.len())).await {
				println!("Aborted.");
				return Ok(());
			}
			match ledger.rent_equipment(member_id, &lines).await {
				Ok(ids) => println!("Equipment rented (rentals {ids:?})."),
				Err(Error::CapacityExceeded { resource }) => {
					println!("Not enough units available for {resource}.");
				},
				Err(err) => return Err(err.into()),
			}
		},
		Commands::Return { rental_id } => {
			if !gate.confirm(&format!("return rental {rental_id}")).await {
				println!("Aborted.");
				return Ok(());
			}
			ledger.return_equipment(rental_id).await?;
			println!("Equipment returned.");
		},
		Commands::AssignPlan { member_id, plan_id } => {
			let action = match plan_id {
				Some(plan) => format!("assign plan {plan} to member {member_id}"),
				None => format!("clear the plan of member {member_id}"),
			};
			if !gate.confirm(&action).await {
				println!("Aborted.");
				return Ok(());
			}
			plan::assign_plan(repo.store().as_ref(), role, member_id, plan_id).await?;
			match plan_id {
				Some(_) => println!("Plan assigned."),
				None => println!("Plan cleared."),
			}
		},
	}

	Ok(())
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
	pairs
		.iter()
		.map(|pair| {
			pair.split_once('=')
				.map(|(name, value)| (name.to_string(), value.to_string()))
				.ok_or_else(|| anyhow!("expected name=value, got `{pair}`"))
		})
		.collect()
}

fn parse_lines(lines: &[String]) -> Result<Vec<RentalLine>> {
	parse_pairs(lines)?
		.into_iter()
		.map(|(equipment_type, quantity)| {
			let quantity =
				quantity.parse::<i64>().map_err(|_| anyhow!("bad quantity `{quantity}` for {equipment_type}"))?;
			Ok(RentalLine { equipment_type, quantity })
		})
		.collect()
}
