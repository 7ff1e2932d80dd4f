pub mod position;

pub use position::{ActiveOrder, MarketPosition, SideState};
