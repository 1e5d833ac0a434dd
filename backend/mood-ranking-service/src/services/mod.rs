pub mod bandit;
pub mod cold_start;
pub mod context;
pub mod learner;
pub mod mood_space;
pub mod ranking;
pub mod reward;
pub mod strategies;
pub mod trajectory;

pub use bandit::BanditStrategySelector;
pub use cold_start::ColdStartGate;
pub use context::ConversationContextMemory;
pub use learner::OnlineLearner;
pub use mood_space::MoodVectorSpace;
pub use ranking::RankingAggregator;
pub use reward::SessionRewardCalculator;
pub use trajectory::EmotionalTrajectoryTracker;
