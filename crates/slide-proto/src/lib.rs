//! Shared types for the slideshow daemon: the viewer wire protocol, the
//! playlist state machine, configuration and platform paths.

pub mod config;
pub mod error;
pub mod platform;
pub mod playlist;
pub mod protocol;
