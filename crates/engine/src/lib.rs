pub mod cli;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod remote;
