//! Terminal dashboard and headless recorder on top of `labdaq_core`.

pub mod app;
pub mod config;
pub mod headless;
pub mod inspect;
pub mod logging;
pub mod plot;
pub mod rigs;
pub mod ui;
