pub mod config;
pub mod flow;
pub mod packet;
pub mod stats;
