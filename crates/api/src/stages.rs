//! Wiring of the per-stage services and the orchestrators between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use stemflow_core::error::CoreError;
use stemflow_core::stage::{predecessor_of, ChainLink, Stage};
use stemflow_db::{JobStore, SubjectStore};
use stemflow_events::EventBus;
use stemflow_pipeline::tools::{AnalysisTool, DownloadTool, SeparationTool};
use stemflow_pipeline::{
    NotificationPort, StageOrchestrator, StageService, StageTool, StageWorker, SubjectLayout,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;

/// One tool per stage.
pub struct StageTools {
    pub download: Arc<dyn StageTool>,
    pub separate: Arc<dyn StageTool>,
    pub analyze: Arc<dyn StageTool>,
}

impl StageTools {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut separate = SeparationTool::new(config.demucs.clone());
        if let Some(devices) = &config.cuda_visible_devices {
            separate = separate.with_env("CUDA_VISIBLE_DEVICES", devices.clone());
        }
        Self {
            download: Arc::new(DownloadTool::new(config.spotdl.clone())),
            separate: Arc::new(separate),
            analyze: Arc::new(AnalysisTool::new(config.analyzer.clone())),
        }
    }

    fn into_all(self) -> [Arc<dyn StageTool>; 3] {
        [self.download, self.separate, self.analyze]
    }
}

/// Everything a [`StageRegistry`] needs besides its tools.
#[derive(Clone)]
pub struct StageDeps {
    pub jobs: Arc<dyn JobStore>,
    pub subjects: Arc<dyn SubjectStore>,
    pub bus: Arc<EventBus>,
    pub notifier: Arc<dyn NotificationPort>,
    pub layout: SubjectLayout,
    pub default_device: String,
}

/// The stage services, keyed by stage, plus the configured chain.
pub struct StageRegistry {
    services: BTreeMap<Stage, Arc<StageService>>,
    chain: Vec<ChainLink>,
    subjects: Arc<dyn SubjectStore>,
    notifier: Arc<dyn NotificationPort>,
}

impl StageRegistry {
    pub fn build(tools: StageTools, chain: Vec<ChainLink>, deps: StageDeps) -> Self {
        let services = tools
            .into_all()
            .into_iter()
            .map(|tool| {
                let stage = tool.stage();
                let worker = Arc::new(StageWorker::new(
                    tool,
                    deps.jobs.clone(),
                    deps.bus.clone(),
                    deps.notifier.clone(),
                    deps.layout.clone(),
                ));
                let service = StageService::new(
                    worker,
                    deps.jobs.clone(),
                    deps.subjects.clone(),
                    deps.bus.clone(),
                )
                .with_predecessor(input_stage(&chain, stage))
                .with_default_device(deps.default_device.clone());
                (stage, Arc::new(service))
            })
            .collect();

        Self {
            services,
            chain,
            subjects: deps.subjects,
            notifier: deps.notifier,
        }
    }

    pub fn service(&self, stage: Stage) -> Result<&Arc<StageService>, CoreError> {
        self.services.get(&stage).ok_or(CoreError::NotFound {
            entity: "Stage",
            id: stage.to_string(),
        })
    }

    pub fn chain(&self) -> &[ChainLink] {
        &self.chain
    }

    /// Start one orchestrator per chain link.
    pub fn spawn_orchestrators(
        &self,
        bus: &EventBus,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.chain
            .iter()
            .filter_map(|link| {
                let successor = self.services.get(&link.successor)?;
                let orchestrator = StageOrchestrator::new(
                    *link,
                    successor.clone(),
                    self.subjects.clone(),
                    self.notifier.clone(),
                );
                Some(orchestrator.spawn(bus, cancel.clone()))
            })
            .collect()
    }
}

/// Stage whose output a submit without `sourceRef` falls back to.
///
/// Uses the default chain when the configured one has no link into `stage`.
fn input_stage(chain: &[ChainLink], stage: Stage) -> Option<Stage> {
    predecessor_of(chain, stage).or_else(|| predecessor_of(&ChainLink::defaults(), stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_stage_falls_back_to_default_chain() {
        assert_eq!(input_stage(&[], Stage::Separate), Some(Stage::Download));
        assert_eq!(input_stage(&[], Stage::Download), None);

        let chain = vec![ChainLink::new(Stage::Separate, Stage::Analyze).unwrap()];
        assert_eq!(input_stage(&chain, Stage::Analyze), Some(Stage::Separate));
    }
}
