mod arc_id;

pub use arc_id::*;
