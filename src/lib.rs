pub mod cache;
pub mod config;
pub mod control;
pub mod engine;
pub mod protocol;
pub mod recipes;
pub mod shared;
pub mod supervisor;
pub mod templates;
