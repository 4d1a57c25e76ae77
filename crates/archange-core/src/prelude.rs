pub use archange_types::prelude::*;

pub use crate::app::Archange;

// vim: ts=4
