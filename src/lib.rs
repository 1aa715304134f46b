//! Formula rendering service: TeX source in, PNG out, sized to the caller's request.

pub mod application;
pub mod config;
pub mod infra;
