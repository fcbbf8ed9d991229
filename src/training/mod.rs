//! Model training
//!
//! - [`decision_tree`] - CART classification tree
//! - [`random_forest`] - bagged forest of those trees
//! - [`trainer`] - seeded split, fit and held-out evaluation

pub mod decision_tree;
pub mod random_forest;
pub mod trainer;

pub use decision_tree::{DecisionTree, TreeNode};
pub use random_forest::{MaxFeatures, RandomForest};
pub use trainer::{
    accuracy, train_test_split, ConfusionMatrix, Evaluation, SubgroupAccuracy, TrainOutcome,
    Trainer, TrainerConfig,
};
