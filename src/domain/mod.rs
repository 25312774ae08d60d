pub mod action;
pub mod cloud;
pub mod config;
pub mod ferry;
pub mod namespace;
pub mod net;
pub mod scenario;
pub mod scheduler;
pub mod simulation;
pub mod utils;
