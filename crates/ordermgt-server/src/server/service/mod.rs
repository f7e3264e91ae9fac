pub mod handler;
pub mod idgen;
