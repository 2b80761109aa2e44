pub mod conflict;
pub mod error;
pub mod ids;
pub mod row;
pub mod scope;
pub mod table;
pub mod value;

pub use conflict::{ApplyAction, Conflict, ConflictType, LocalState};
pub use error::CoreError;
pub use ids::ScopeId;
pub use row::{PrimaryKey, Row, RowOperation};
pub use scope::{Scope, Timestamp};
pub use table::TableDescriptor;
pub use value::ColumnValue;
