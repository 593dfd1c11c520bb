pub mod media;
pub mod progress;
pub mod turn;

pub use progress::{LiveProgress, LiveProgressCache, ProgressMeta, ProgressUpdate};
pub use turn::{
    poll_progress, run_turn, run_turn_streaming, TemplateMessage, TurnEvent, TurnInput, TurnMeta,
    TurnOptions, TurnOutcome,
};
