pub mod audit_loop;
pub mod watcher;
