pub mod estimate;
pub mod playground;

pub use estimate::StructuredEstimator;
pub use playground::PromptPlayground;
