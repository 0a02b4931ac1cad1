mod message;
mod team;
mod work_item;

pub use message::*;
pub use team::*;
pub use work_item::*;
