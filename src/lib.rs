pub mod budget;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod quota;
pub mod stream;

mod util;
