pub mod blob;
pub mod chat;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod transitions;
pub mod workflow;
