//! # System Interaction Layer
//!
//! The boundary between the pipeline and the operating system.
//!
//! - **`executor`**: runs the external KiCad automation tools with retries,
//!   classifies their exit status and cleans up the artifacts they leave.
//! - **`tools`**: locates tool executables.

pub mod executor;
pub mod tools;
