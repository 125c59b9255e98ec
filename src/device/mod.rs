pub mod codec;
pub mod command;
pub mod connection;
pub mod constants;
pub mod controller;
pub mod dispatcher;
pub mod scanner;
pub mod session;
pub mod transport;
pub mod types;
