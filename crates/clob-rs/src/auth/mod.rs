pub mod models;

pub use models::{Account, ApiCreds};
