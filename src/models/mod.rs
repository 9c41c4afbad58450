use chrono::{DateTime, Utc};

mod note;
mod todo;

pub use note::*;
pub use todo::*;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
