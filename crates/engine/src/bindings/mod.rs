//! Binding algorithms turning declarations into concrete name to value maps.
//!
//! All binders preserve declaration order in their output. Sensitivity is
//! carried on the bound [`Value`](stepwise_types::Value)s; masking is the
//! event layer's job.

mod arguments;
mod inputs;
mod outputs;
mod results;

pub use arguments::bind_arguments;
pub use inputs::{PromptSettings, bind_inputs, bind_inputs_with_prompts};
pub use outputs::{ReadOnlyContextAccessor, bind_outputs};
pub use results::resolve_result;
