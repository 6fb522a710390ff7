pub mod bind;
pub mod manager;

pub use bind::{bind_all, bind_value, column_value, row_to_json, AnyQuery};
pub use manager::{DatabaseError, DatabaseManager};
