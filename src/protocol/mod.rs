pub mod broker;
pub mod constants;
pub mod frame;
pub mod reader;
pub mod serial;
pub mod snoop;
pub mod tables;
