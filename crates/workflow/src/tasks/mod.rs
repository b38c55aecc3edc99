//! Built-in extraction tasks and the pipelines assembled from them.

pub mod boolean;
pub mod diagnosis;
pub mod medication;
pub mod procedure;

use terminology::{ConceptSearch, EclQuery, IcdClient, RxNavClient};
use tracing::info;

use crate::error::BuildError;
use crate::pipeline::{Pipeline, TaskDescriptor, Workflow, WorkflowSuite};
use crate::registry::WorkflowContext;

use self::boolean::ExtractedStatement;
use self::diagnosis::{Diagnosis, ExtractedDiagnosis, IcdDiagnosisLookup};
use self::medication::{ExtractedMedication, Medication, RxNavLookup};
use self::procedure::{ExtractedProcedure, Procedure, SnomedProcedureLookup};

/// Medication, diagnosis and procedure extraction over the same letter
pub const EXTRACTION_SUITE: &str = "extraction_workflow";

pub fn medication_pipeline(
    ctx: &WorkflowContext,
) -> Result<Pipeline<ExtractedMedication, Medication>, BuildError> {
    let terminology = &ctx.config.terminology;
    let client = match terminology.rxnav_base_url.as_deref() {
        Some(url) => Some(RxNavClient::new(url, terminology.timeout_secs)?),
        None => {
            info!("RxNav disabled, medications are stored without codes");
            None
        }
    };

    let pipeline = TaskDescriptor::new(medication::NAME, medication::PROMPT)
        .node(RxNavLookup::new(client, terminology.lookup_policy))
        .compile(ctx.model.clone(), ctx.sink.clone(), ctx.config.retry.policy())?;
    Ok(pipeline)
}

pub fn diagnosis_pipeline(
    ctx: &WorkflowContext,
) -> Result<Pipeline<ExtractedDiagnosis, Diagnosis>, BuildError> {
    let terminology = &ctx.config.terminology;
    let client = if terminology.icd.has_credentials() {
        Some(IcdClient::new(&terminology.icd)?)
    } else {
        info!("No ICD API credentials, diagnoses are stored without codes");
        None
    };

    let retry = ctx.config.retry.policy();
    let lookup = IcdDiagnosisLookup::new(client, ctx.model.clone(), retry, terminology.lookup_policy)?;

    let pipeline = TaskDescriptor::new(diagnosis::NAME, diagnosis::PROMPT)
        .node(lookup)
        .compile(ctx.model.clone(), ctx.sink.clone(), retry)?;
    Ok(pipeline)
}

pub fn procedure_pipeline(
    ctx: &WorkflowContext,
) -> Result<Pipeline<ExtractedProcedure, Procedure>, BuildError> {
    let terminology = &ctx.config.terminology;
    let search = match &terminology.snowstorm {
        Some(config) => Some(ConceptSearch::new(config, EclQuery::procedures())?),
        None => {
            info!("No Snowstorm server configured, procedures are stored without codes");
            None
        }
    };

    let retry = ctx.config.retry.policy();
    let lookup = SnomedProcedureLookup::new(
        search,
        terminology.synonyms.clone(),
        ctx.model.clone(),
        retry,
        terminology.lookup_policy,
    )?;

    let pipeline = TaskDescriptor::new(procedure::NAME, procedure::PROMPT)
        .node(lookup)
        .compile(ctx.model.clone(), ctx.sink.clone(), retry)?;
    Ok(pipeline)
}

/// Labels letters against the context's statement; fails without one
pub fn boolean_pipeline(
    ctx: &WorkflowContext,
) -> Result<Pipeline<ExtractedStatement, ExtractedStatement>, BuildError> {
    let statement = ctx
        .statement
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BuildError::MissingStatement(boolean::NAME.to_string()))?;

    let pipeline = TaskDescriptor::new(boolean::NAME, boolean::prompt_for(statement))
        .compile(ctx.model.clone(), ctx.sink.clone(), ctx.config.retry.policy())?;
    Ok(pipeline)
}

pub fn extraction_suite(ctx: &WorkflowContext) -> Result<WorkflowSuite, BuildError> {
    let members: Vec<Box<dyn Workflow>> = vec![
        Box::new(medication_pipeline(ctx)?),
        Box::new(diagnosis_pipeline(ctx)?),
        Box::new(procedure_pipeline(ctx)?),
    ];
    Ok(WorkflowSuite::new(EXTRACTION_SUITE, members))
}
