use extract::StructuredModel;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::BuildError;
use crate::pipeline::Workflow;
use crate::storage::CsvSink;
use crate::tasks::{self, boolean, diagnosis, medication, procedure};

/// Everything a workflow factory needs to assemble a runnable pipeline
#[derive(Clone)]
pub struct WorkflowContext {
    pub model: Arc<dyn StructuredModel>,
    pub sink: Arc<CsvSink>,
    pub config: AppConfig,
    /// Criterion for the boolean statement workflow
    pub statement: Option<String>,
}

impl WorkflowContext {
    pub fn new(model: Arc<dyn StructuredModel>, config: AppConfig) -> Self {
        Self {
            model,
            sink: Arc::new(CsvSink::new(config.storage.clone())),
            config,
            statement: None,
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }
}

type Factory = Box<dyn Fn(&WorkflowContext) -> Result<Box<dyn Workflow>, BuildError> + Send + Sync>;

/// Workflow names mapped to the factories that build them
pub struct WorkflowRegistry {
    factories: BTreeMap<String, Factory>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in tasks and the combined extraction suite
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(medication::NAME, |ctx| {
            Ok(Box::new(tasks::medication_pipeline(ctx)?))
        });
        registry.register(diagnosis::NAME, |ctx| {
            Ok(Box::new(tasks::diagnosis_pipeline(ctx)?))
        });
        registry.register(procedure::NAME, |ctx| {
            Ok(Box::new(tasks::procedure_pipeline(ctx)?))
        });
        registry.register(boolean::NAME, |ctx| {
            Ok(Box::new(tasks::boolean_pipeline(ctx)?))
        });
        registry.register(tasks::EXTRACTION_SUITE, |ctx| {
            Ok(Box::new(tasks::extraction_suite(ctx)?))
        });
        registry
    }

    /// Replaces any factory already registered under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&WorkflowContext) -> Result<Box<dyn Workflow>, BuildError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Sorted workflow names
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn build(&self, name: &str, ctx: &WorkflowContext) -> Result<Box<dyn Workflow>, BuildError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BuildError::UnknownWorkflow {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        factory(ctx)
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::WorkflowSuite;
    use crate::storage::StorageConfig;
    use extract::testing::ScriptedModel;
    use ingest::Document;
    use serde_json::json;
    use tempfile::TempDir;

    fn context(dir: &TempDir, model: Arc<ScriptedModel>) -> WorkflowContext {
        let mut config = AppConfig::default();
        config.storage = StorageConfig {
            base_dir: dir.path().to_path_buf(),
            split_patient: false,
        };
        config.terminology.rxnav_base_url = None;
        config.retry.max_retries = 0;
        WorkflowContext::new(model, config)
    }

    fn aspirin_response() -> String {
        json!({"data": [{
            "reference": "Aspirin 100mg daily",
            "name": "Aspirin",
            "name_translated": "Aspirin",
            "active_ingredient": "acetylsalicylic acid",
            "dose": 100.0,
            "unit": "mg",
            "route": "oral",
            "frequency": "daily",
            "frequency_code": "QD"
        }]})
        .to_string()
    }

    #[test]
    fn test_default_names_are_sorted() {
        let registry = WorkflowRegistry::default();
        assert_eq!(
            registry.names(),
            vec![
                "boolean_statement_workflow",
                "diagnosis_extraction_workflow",
                "extraction_workflow",
                "medication_extraction_workflow",
                "procedure_extraction_workflow",
            ]
        );
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_unknown_workflow_lists_available() {
        let dir = TempDir::new().unwrap();
        let registry = WorkflowRegistry::with_defaults();
        let ctx = context(&dir, Arc::new(ScriptedModel::new(Vec::<String>::new())));

        let err = registry.build("allergy_workflow", &ctx).err().unwrap();

        match err {
            BuildError::UnknownWorkflow { name, available } => {
                assert_eq!(name, "allergy_workflow");
                assert!(available.contains("medication_extraction_workflow"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_boolean_requires_statement() {
        let dir = TempDir::new().unwrap();
        let registry = WorkflowRegistry::with_defaults();
        let ctx = context(&dir, Arc::new(ScriptedModel::new(Vec::<String>::new())));

        let err = registry.build(boolean::NAME, &ctx).err().unwrap();
        assert!(matches!(err, BuildError::MissingStatement(_)));

        let ctx = ctx.with_statement("Patient is a smoker");
        let workflow = registry.build(boolean::NAME, &ctx).unwrap();
        assert_eq!(workflow.name(), boolean::NAME);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = WorkflowRegistry::new();
        assert!(registry.is_empty());

        registry.register("meds_only", |ctx| {
            let members: Vec<Box<dyn Workflow>> = vec![Box::new(tasks::medication_pipeline(ctx)?)];
            Ok(Box::new(WorkflowSuite::new("meds_only", members)))
        });
        assert!(registry.contains("meds_only"));

        assert!(registry.unregister("meds_only"));
        assert!(!registry.unregister("meds_only"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_medication_workflow_end_to_end() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([aspirin_response()]));
        let ctx = context(&dir, model.clone());

        let workflow = WorkflowRegistry::with_defaults()
            .build(medication::NAME, &ctx)
            .unwrap();
        let summary = workflow
            .run(&Document::new("p1", "Aspirin 100mg daily"))
            .await
            .unwrap();

        assert_eq!(summary.workflow, medication::NAME);
        assert_eq!(summary.patient_id, "p1");
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.stored, 1);

        let path = dir.path().join("medication_extraction_workflow.csv");
        assert_eq!(summary.paths, vec![path.clone()]);

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "reference,name,name_translated,active_ingredient,dose,unit,route,frequency,frequency_code,rxcui,atc_codes,patient_id"
        );
        assert!(lines[1].starts_with("Aspirin 100mg daily,Aspirin,Aspirin,acetylsalicylic acid,"));
        assert!(lines[1].ends_with(",QD,,,p1"));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_extraction_suite_runs_every_task() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            aspirin_response(),
            json!({"data": []}).to_string(),
            json!({"data": []}).to_string(),
        ]));
        let ctx = context(&dir, model.clone());

        let workflow = WorkflowRegistry::with_defaults()
            .build(tasks::EXTRACTION_SUITE, &ctx)
            .unwrap();
        let summary = workflow
            .run(&Document::new("p1", "Aspirin 100mg daily"))
            .await
            .unwrap();

        assert_eq!(summary.workflow, "extraction_workflow");
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(model.calls(), 3);
        assert!(dir.path().join("medication_extraction_workflow.csv").exists());
        assert!(!dir.path().join("diagnosis_extraction_workflow.csv").exists());
    }

    #[tokio::test]
    async fn test_patient_id_is_preserved() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([json!({"data": []}).to_string()]));
        let ctx = context(&dir, model);

        let workflow = WorkflowRegistry::with_defaults()
            .build(diagnosis::NAME, &ctx)
            .unwrap();
        let summary = workflow
            .run(&Document::new("patient/01", "Keine Diagnosen."))
            .await
            .unwrap();

        assert_eq!(summary.patient_id, "patient/01");
        assert_eq!(summary.stored, 0);
    }
}
