//! Turn state machine
//!
//! Pure transitions in the Elm style: `transition(state, context, event)`
//! returns the next state plus the effects the runtime must carry out. No
//! I/O happens here; clocks and conversation data come in via the context.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, TurnOutcome};
pub use event::{Event, TurnInput};
pub use state::{Modality, PendingTurn, Toggles, TurnContext, TurnState};
pub use transition::transition;
