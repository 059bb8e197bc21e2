//! Run orchestration for Aloe: cluster refinement, classification fan-out,
//! action planning, plan execution, human review and the end-to-end pipeline.

pub mod agent;
pub mod classify;
pub mod pipeline;
pub mod plan;
pub mod refine;
pub mod review;
pub mod runner;
pub mod state;
