mod admin;
mod common;
mod scheduler;
mod store;
