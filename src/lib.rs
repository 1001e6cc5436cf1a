pub mod error;
pub mod form;
pub mod ledger;
pub mod plan;
pub mod policy;
pub mod repository;
pub mod schema;
pub mod store;

pub use error::{Action, Error};
pub use form::{FieldSpec, FormMode, Widget};
pub use ledger::{Ledger, RentalLine};
pub use policy::{PermissionDecision, Role};
pub use repository::{AutoConfirm, Gate, Repository, TableContext};
pub use schema::{ColumnDescriptor, SchemaCache, TableSchema};
pub use store::{Record, Store};
