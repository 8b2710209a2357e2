pub mod config;
pub mod dedup;
pub mod ipc;
pub mod pipeline;
pub mod queue;
pub mod sample;
pub mod session;
pub mod source;
pub mod watermark;
pub mod window;
