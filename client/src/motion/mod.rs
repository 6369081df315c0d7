pub mod classifier;
pub mod matcher;

pub use classifier::MotionClassifier;
