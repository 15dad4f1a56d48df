pub mod add;
pub mod extract;
pub mod list;
