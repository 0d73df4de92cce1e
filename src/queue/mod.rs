pub mod write_queue;
