pub mod affine;
pub mod drop_files;
pub mod engine;
pub mod headless;
pub mod latch;
pub mod message;
pub mod run_loop;
pub mod scheduler;
