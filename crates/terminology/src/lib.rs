pub mod error;
pub mod http;
pub mod icd;
pub mod rxnav;
pub mod snowstorm;

pub use error::LookupError;
pub use http::LookupClient;
pub use icd::{IcdCandidate, IcdClient, IcdConfig};
pub use rxnav::{RxNavClient, RXNAV_BASE_URL};
pub use snowstorm::{ConceptMatch, ConceptSearch, EclQuery, SnowstormConfig, PROCEDURE_ROOT};
