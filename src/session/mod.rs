//! Check sessions: leases on the container a resource config is checked in

pub mod manager;
pub mod state;

pub use manager::CheckSessionFactory;
pub use state::{CheckSession, ContainerExpiries, SessionOwner};
