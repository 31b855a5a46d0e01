pub mod amount;
pub mod classify;
pub mod pipeline;
pub mod progress;
pub mod source;
