//! Concrete collaborators: SSH transport, Cassandra driver, directory store.

pub mod cassandra;
pub mod fs_store;
pub mod ssh;

pub use cassandra::CassandraDriver;
pub use fs_store::FsObjectStore;
pub use ssh::SshExecutor;
