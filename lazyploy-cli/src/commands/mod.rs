pub mod agent;
pub mod builds;
pub mod init;
pub mod status;
