//! 服务模块

pub mod assessment;
pub mod features;
pub mod fusion;
pub mod ingestion;
pub mod session;

pub use assessment::{AssessmentService, AssessmentServiceImpl, FuseRequest, create_assessment_service};
pub use features::{FeatureExtractor, behavioral_feature_for};
pub use fusion::FusionCombiner;
pub use ingestion::{
    BatchSummary, EventAck, EventStatus, IngestionService, IngestionServiceImpl, RejectedEvent,
    create_ingestion_service, spawn_inactivity_sweeper,
};
pub use session::{SessionSignal, SessionStateMachine};
