pub mod teams;
pub mod work_items;
