// src/learning/mod.rs
pub mod active_learning;
pub mod classifier;
pub mod training_store;

pub use active_learning::{
    labeled_examples, labeling_batch, select_uncertain_pairs, suggest_threshold, LabelingTask,
    ThresholdSuggestion, UncertainPair,
};
pub use classifier::{train_classifier, ClassifierScorer, EvaluationMetrics, PairClassifier};
pub use training_store::TrainingStore;
