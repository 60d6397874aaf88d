//! Live order-book state: one sorted side book per side plus the manager
//! that feeds snapshots and updates into them.

mod manager;
mod side;

pub use manager::BookManager;
pub use side::{BookSide, SideBook};
