//! CLI front end for bgbatch
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{
    main, AnimateArgs, Cli, CliAnimationFormat, CliExecutionProvider, CliLogFormat, Command,
    RemoveArgs,
};
