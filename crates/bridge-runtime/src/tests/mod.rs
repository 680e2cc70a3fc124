//! Bridge scenario tests and shared test doubles

pub mod support;
