pub mod bootstrap;
pub mod info;
pub mod probe;
pub mod retry;
pub mod token;
