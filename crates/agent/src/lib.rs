//! The agent reasoning loop and the factory that builds one per invocation.
//!
//! The agent follows a **Plan → Act → Observe** cycle:
//!
//! 1. **Receive** a prompt (plus any history rehydrated from the session store)
//! 2. **Send to the model** with the enabled tool definitions
//! 3. **If tool calls**: execute them one at a time, append results, loop back to 2
//! 4. **If text response**: return it to the caller
//!
//! The loop continues until the model responds with text only or the max
//! iteration limit is reached.

pub mod factory;
pub mod loop_runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use factory::AgentFactory;
pub use loop_runner::{AgentLoop, MAX_ITERATIONS_MESSAGE};
