pub mod protos;
pub mod receiver;
pub mod relay;
