//! Research pipeline: state, stages, loop controller and workflow engine.
//!
//! A run moves through four stages:
//! 1. **Plan**: decompose the query into 1-5 sub-questions
//! 2. **Gather**: search web or academic sources per sub-question
//! 3. **Analyze**: extract structured findings; may loop back to Gather
//! 4. **Report**: synthesize a cited markdown report

pub mod analyze;
pub mod controller;
pub mod engine;
pub mod events;
pub mod gather;
pub mod plan;
pub mod prompts;
pub mod report;
pub mod state;

pub use analyze::Verdict;
pub use controller::{LoopController, Route};
pub use engine::ResearchEngine;
pub use events::{NoOpObserver, Stage, WorkflowObserver};
pub use state::{
    KeyFinding, QuestionSources, ResearchRequest, ResearchState, SearchMode, Step,
};
