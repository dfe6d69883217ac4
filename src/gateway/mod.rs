pub mod client;

pub use client::HttpPaymentGateway;
