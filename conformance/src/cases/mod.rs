//! Registered cases, one module per category.

pub mod execute_query;
pub mod read_row;
pub mod read_rows;
