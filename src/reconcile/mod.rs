pub mod reconciler;
pub mod rule;
