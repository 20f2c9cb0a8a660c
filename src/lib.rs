//! Core library for the gal-scan survey orchestrator.
//!
//! A radio telescope observes the 21 cm hydrogen line across a sequence of
//! sky targets. This library turns an operator's plan into a [`survey::Survey`],
//! runs it against a [`hardware::Station`] and persists the resulting
//! observation table. Every hardware-affecting operation goes through the
//! single-flight [`scheduler::ActionScheduler`], so the dish never receives
//! two conflicting commands.
//!
//! The `gal-scan` binary is a thin batch front end over [`plan::PlanArgs`].

pub mod config;
pub mod coords;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod plan;
pub mod scheduler;
pub mod storage;
pub mod survey;
pub mod weather;

pub use config::Settings;
pub use error::{AppResult, ScanError};
pub use hardware::Station;
pub use plan::{Mode, PlanArgs};
pub use scheduler::{ActionId, ActionScheduler, QueueSnapshot};
pub use survey::{Survey, SurveyOutcome, SurveyState};
