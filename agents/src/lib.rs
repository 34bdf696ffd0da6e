//! The two-stage agent pipeline: a router that turns a conversation turn
//! into a typed invocation plan, knowledge functions executed against the
//! corpus and the score engine, and a synthesizer that streams the final
//! sectioned, citation-annotated answer. The orchestrator drives the three
//! stages and owns the per-turn event stream.

pub mod events;
pub mod functions;
pub mod orchestrator;
pub mod plan;
pub mod router;
pub mod sections;
pub mod synthesizer;
