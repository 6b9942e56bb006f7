// Table metadata and row values shared by every stage of a reconciliation.

pub mod table;
pub mod value;

pub use table::{Column, ColumnType, ForeignKey, TableDescriptor, TableName};
pub use value::{Key, Row, Value};
