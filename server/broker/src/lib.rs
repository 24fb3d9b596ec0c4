pub mod config;
pub mod logging;
pub mod service;
pub mod udp;
pub mod zmq;
