pub mod filter;
pub mod lance;

pub use filter::ItemFilter;
pub use lance::{LanceStore, StoreStats};
