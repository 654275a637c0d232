pub mod backbones;
pub mod contents;
pub mod db;
pub mod executions;
pub mod locks;
pub mod models;
pub mod nodes;
mod tables;
pub mod uploads;

pub use db::{Database, DatabaseError};
pub use tables::*;
