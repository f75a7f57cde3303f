// src/core/mod.rs

pub mod component;
pub mod document;
pub mod expand;
pub mod kicad_config;
pub mod orchestrator;
pub mod paths;
pub mod plan;
pub mod registry;
pub mod schema;
