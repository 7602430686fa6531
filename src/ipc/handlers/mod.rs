pub mod cells;
pub mod core;
pub mod reviews;
pub mod workbook;
