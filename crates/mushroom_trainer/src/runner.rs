//! Pipeline orchestration
//!
//! Stages run strictly in `StageName::ALL` order. The first failure stops the
//! run and is returned to the caller as-is; artifacts already written by
//! earlier stages stay on disk so a later run can resume with `run_stage`.

use mushroom_core::{ConfigurationManager, PipelineError, Result, StageConfig, StageName};
use tracing::{error, info, info_span};

use crate::evaluation::ModelEvaluation;
use crate::ingestion::DataIngestion;
use crate::training::ModelTraining;
use crate::transformation::DataTransformation;

/// One step of the pipeline.
pub trait PipelineStage {
    fn name(&self) -> StageName;

    /// `Ok(false)` means the stage finished without error but did not succeed.
    fn run(&self) -> Result<bool>;
}

/// Stages that completed, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<StageName>,
}

/// A pipeline stage backed by the component its resolved config selects.
pub struct StandardStage {
    name: StageName,
    manager: ConfigurationManager,
}

impl StandardStage {
    pub fn new(name: StageName, manager: ConfigurationManager) -> Self {
        Self { name, manager }
    }
}

impl PipelineStage for StandardStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn run(&self) -> Result<bool> {
        match self.manager.resolve(self.name)? {
            StageConfig::Ingestion(config) => {
                let output = DataIngestion::new(config)?.ingest()?;
                info!(
                    downloaded = output.downloaded,
                    files = output.extracted_files,
                    "Raw table at {}",
                    output.raw_table_path.display()
                );
                Ok(true)
            }
            StageConfig::Transformation(config) => {
                let output = DataTransformation::new(config).transform_data()?;
                Ok(!output.schema.is_empty())
            }
            StageConfig::Training(config) => {
                let output = ModelTraining::new(config)?.train()?;
                info!(model_hash = %output.model_hash, "Model ready");
                Ok(true)
            }
            StageConfig::Evaluation(config) => {
                ModelEvaluation::new(config)?.evaluate()?;
                Ok(true)
            }
        }
    }
}

/// Runs the four stages in order.
pub struct PipelineRunner {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl PipelineRunner {
    /// Standard stages backed by one configuration.
    pub fn from_config(manager: &ConfigurationManager) -> Self {
        let stages = StageName::ALL
            .iter()
            .map(|&name| {
                Box::new(StandardStage::new(name, manager.clone())) as Box<dyn PipelineStage>
            })
            .collect();
        Self { stages }
    }

    /// Custom stages; they must cover every stage, in pipeline order.
    pub fn with_stages(stages: Vec<Box<dyn PipelineStage>>) -> Result<Self> {
        let names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        if names != StageName::ALL {
            return Err(PipelineError::Config(format!(
                "stages must be {:?}, got {:?}",
                StageName::ALL,
                names
            )));
        }
        Ok(Self { stages })
    }

    pub fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        for stage in &self.stages {
            execute(stage.as_ref())?;
            report.completed.push(stage.name());
        }
        info!("Pipeline finished: {:?}", report.completed);
        Ok(report)
    }

    /// Run a single stage, e.g. to resume after fixing a failure.
    pub fn run_stage(&self, name: StageName) -> Result<()> {
        let stage = self
            .stages
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| PipelineError::Config(format!("no stage named {name}")))?;
        execute(stage.as_ref())
    }
}

fn execute(stage: &dyn PipelineStage) -> Result<()> {
    let name = stage.name();
    let span = info_span!("stage", name = %name);
    let _enter = span.enter();

    info!(">>>>>> stage {} started <<<<<<", name.banner());
    match stage.run() {
        Ok(true) => {
            info!(">>>>>> stage {} completed <<<<<<", name.banner());
            Ok(())
        }
        Ok(false) => {
            error!(stage = %name, "Stage reported failure");
            Err(PipelineError::Halted { stage: name })
        }
        Err(e) => {
            error!(stage = %name, "Stage failed: {}", e);
            Err(e)
        }
    }
}
