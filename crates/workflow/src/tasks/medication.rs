use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use terminology::{LookupError, RxNavClient};
use tracing::debug;

use crate::error::NodeError;
use crate::node::{LookupPolicy, ProcessingNode};
use crate::state::WorkflowState;

pub const NAME: &str = "medication_extraction_workflow";

pub const PROMPT: &str = "\
Given a doctor's letter containing none or multiple medications, extract all medications and their relevant information.

Values to extract:
- reference: The medication as it appears in the text with all details (e.g. dosage, unit, frequency).
- name: The name of the medication (brand name or generic name).
- name_translated: The name of the medication translated to English without any additional details.
- active_ingredient: The active ingredient of the medication.
- dose: The numeric value of the dose. If no dose is given, return -1.
- unit: The unit of the dose (e.g. mg, ml). If no unit is given, return an empty string.
- route: The route of administration (e.g. oral, intravenous). If no route is given, return an empty string.
- frequency: The frequency of the medication (e.g. 1-0-1-0, as needed). If no frequency is given, return an empty string.
- frequency_code: The frequency code of the medication. Use one of:
    * Q<hours>H: every <hours> hours (e.g. Q8H)
    * Q<days>D: every <days> days (e.g. Q1D)
    * Q<weeks>W: every <weeks> weeks (e.g. Q1W)
    * BID: twice a day (e.g. 1-0-1-0)
    * TID: three times a day (e.g. 1-1-1-0)
    * QID: four times a day (e.g. 1-1-1-1)
    * QD: once a day when neither AM nor PM fits (e.g. 0-1-0)
    * AM: in the morning (1-0-0-0)
    * PM: in the evening (0-0-1-0)
    * PRN: as needed
    * NaF: not a frequency (e.g. medication that is not taken regularly)
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedMedication {
    pub reference: String,
    pub name: String,
    pub name_translated: String,
    pub active_ingredient: String,
    /// -1 when the letter gives no dose
    pub dose: f64,
    pub unit: String,
    pub route: String,
    pub frequency: String,
    pub frequency_code: String,
}

/// Medication with RxNorm and ATC codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(flatten)]
    pub medication: ExtractedMedication,
    pub rxcui: String,
    pub atc_codes: Vec<String>,
}

impl From<ExtractedMedication> for Medication {
    fn from(medication: ExtractedMedication) -> Self {
        Self {
            medication,
            rxcui: String::new(),
            atc_codes: Vec::new(),
        }
    }
}

/// Adds RxCUI and ATC codes from RxNav.
///
/// Without a client every medication is stored uncoded.
pub struct RxNavLookup {
    client: Option<RxNavClient>,
    policy: LookupPolicy,
}

impl RxNavLookup {
    pub fn new(client: Option<RxNavClient>, policy: LookupPolicy) -> Self {
        Self { client, policy }
    }

    async fn codes(
        client: &RxNavClient,
        medication: &ExtractedMedication,
    ) -> Result<(String, Vec<String>), LookupError> {
        let Some(rxcui) = client
            .rxcui(&medication.name_translated, &medication.active_ingredient)
            .await?
        else {
            debug!(medication = %medication.name_translated, "No RxNorm concept found");
            return Ok((String::new(), Vec::new()));
        };

        let atc_codes = client.atc_codes(&rxcui).await?;
        Ok((rxcui, atc_codes))
    }
}

#[async_trait]
impl ProcessingNode<ExtractedMedication, Medication> for RxNavLookup {
    fn name(&self) -> &str {
        "rx_nav_lookup"
    }

    async fn process(
        &self,
        state: &mut WorkflowState<ExtractedMedication, Medication>,
    ) -> Result<(), NodeError> {
        let mut medications = Vec::new();

        for extracted in state.extracted().unwrap_or_default() {
            let mut medication = Medication::from(extracted.clone());

            if let Some(client) = &self.client {
                let result = Self::codes(client, extracted).await;
                let (rxcui, atc_codes) = self.policy.resolve(self.name(), &extracted.name, result)?;
                medication.rxcui = rxcui;
                medication.atc_codes = atc_codes;
            }

            medications.push(medication);
        }

        state.set_processed(medications);
        Ok(())
    }
}
