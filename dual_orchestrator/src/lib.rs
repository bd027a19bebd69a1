//! Dual Orchestrator - Core Library
//!
//! An adaptive router that picks between interchangeable tool providers,
//! learns from every call, composes multi-step workflows out of provider
//! calls and keeps per-session research memory.

pub mod cache;
pub mod cli;
pub mod composer;
pub mod demo;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod router;
pub mod session;
pub mod settings;
pub mod telemetry;

pub use error::{OrchestrationError, Result};
pub use orchestrator::{DashboardSnapshot, Orchestrator};
pub use provider::Provider;
pub use router::{RouteContext, Router};
