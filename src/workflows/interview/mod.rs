//! Interview pipeline: candidate records moving from join to onboarding, the exclusion
//! registry, the delayed moderation queue, and the debounced statistics projections.
//!
//! Messaging platforms stay behind [`CommunityGateway`]; profile judgement stays behind
//! [`ContentClassifier`]. Everything else is owned here and persisted as three JSON documents.

pub mod admin;
pub mod bans;
pub mod delayed;
pub mod domain;
pub mod gateway;
pub mod lifecycle;
pub mod projection;
pub mod projector;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod stats;
pub mod store;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::Router;

pub use admin::{AdjustMode, AdjustmentReport, AdminConsole, AdminError, BanListing};
pub use bans::{BanBook, BanRegistry};
pub use delayed::{ActionQueue, DelayedActionQueue};
pub use domain::{
    ActionId, ActionScope, BanKind, BanOrigin, BanRecord, CandidateProgress, CandidateStatus,
    ChannelRef, CommunityId, DelayedAction, InterviewRecord, MessageRef, OutcomeKind, Period,
    PipelineState, ProgressKey, SubjectId,
};
pub use gateway::{
    ClassifierError, CommunityGateway, ContentClassifier, GatewayError, ProfileConcern,
    ProfileEvaluation, ReplyClass,
};
pub use lifecycle::{
    AckStatus, Acknowledgement, CandidateLifecycle, OutcomeChoice, PipelineEvent, PipelineStores,
    ReviewAction,
};
pub use projection::GatewayProjection;
pub use projector::{DebouncedProjector, ProjectionTarget};
pub use router::{pipeline_router, PipelineApi};
pub use scheduler::{PipelineScheduler, TickReport};
pub use settings::PipelineSettings;
pub use stats::StatsAggregator;
pub use store::{JsonDocumentStore, StoreError};

use crate::config::PipelineConfig;

/// Fully wired pipeline. Every component shares the same three stores.
pub struct Pipeline {
    pub stores: PipelineStores,
    pub projector: Arc<DebouncedProjector>,
    pub lifecycle: Arc<CandidateLifecycle>,
    pub admin: Arc<AdminConsole>,
    pub scheduler: Arc<PipelineScheduler>,
}

impl Pipeline {
    /// Load the documents under the configured data directory and wire the components.
    pub async fn open(
        config: &PipelineConfig,
        gateway: Arc<dyn CommunityGateway>,
        classifier: Arc<dyn ContentClassifier>,
    ) -> Result<Self, StoreError> {
        let stores = open_stores(config).await?;
        Ok(Self::assemble(stores, gateway, classifier, config.settings()))
    }

    pub fn assemble(
        stores: PipelineStores,
        gateway: Arc<dyn CommunityGateway>,
        classifier: Arc<dyn ContentClassifier>,
        settings: PipelineSettings,
    ) -> Self {
        let stats = StatsAggregator::new(settings.utc_offset, settings.monthly_goal);
        let projection = Arc::new(GatewayProjection::new(
            Arc::clone(&stores.state),
            Arc::clone(&gateway),
            settings.channels,
            stats,
        ));
        let projector = Arc::new(DebouncedProjector::new(projection.clone()));
        let lifecycle = Arc::new(CandidateLifecycle::new(
            stores.clone(),
            Arc::clone(&gateway),
            classifier,
            Arc::clone(&projector),
            settings.clone(),
        ));
        let admin = Arc::new(AdminConsole::new(
            stores.clone(),
            gateway,
            projection,
            Arc::clone(&projector),
            settings.clone(),
        ));
        let scheduler = Arc::new(PipelineScheduler::new(
            Arc::clone(&lifecycle),
            stores.clone(),
            settings.poll_interval,
        ));

        Self {
            stores,
            projector,
            lifecycle,
            admin,
            scheduler,
        }
    }

    pub fn api(&self) -> PipelineApi {
        PipelineApi {
            lifecycle: Arc::clone(&self.lifecycle),
            admin: Arc::clone(&self.admin),
        }
    }

    pub fn router(&self) -> Router {
        pipeline_router(self.api())
    }
}

/// Open the three documents without wiring any collaborators.
pub async fn open_stores(config: &PipelineConfig) -> Result<PipelineStores, StoreError> {
    let state = JsonDocumentStore::open(config.state_path()).await?;
    let bans = JsonDocumentStore::open(config.bans_path()).await?;
    let actions = JsonDocumentStore::open(config.actions_path()).await?;
    Ok(PipelineStores {
        state: Arc::new(state),
        bans: Arc::new(BanRegistry::new(bans)),
        actions: Arc::new(DelayedActionQueue::new(actions)),
    })
}
