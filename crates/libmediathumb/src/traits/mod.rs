//! Module for traits the binary implements to configure library functions

pub mod subtitle_options;
