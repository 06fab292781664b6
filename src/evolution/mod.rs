// Evolution Module - Knowledge lifecycle decisions
//
// Decides what learned knowledge to keep, prune, and merge, how
// confidence evolves from new evidence, and runs the periodic reflection
// pass.
//
// Components:
// - engine: pruning rules, experience updates, merging, reflection
// - scheduler: auto-evolution interval wrapper with deterministic stop

pub mod engine;
pub mod scheduler;

pub use engine::{EvolutionReport, KnowledgeEvolutionEngine, PruningDecision};
pub use scheduler::{AutoEvolution, EvolutionCycle, SchedulerError};
