mod common;

mod client_tests;
mod health_tests;
