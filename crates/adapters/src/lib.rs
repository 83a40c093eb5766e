pub mod direct;
pub mod http;

mod credentials;
mod mysql;
mod postgres;
