pub mod adapter;
pub mod catalog;
pub mod gateway;
pub mod registry;
