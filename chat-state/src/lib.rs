mod database;
mod model;

pub use database::Database;
pub use model::{Account, CommandOutcome, Message};
