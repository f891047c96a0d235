pub mod harness;
pub mod seed_server;
