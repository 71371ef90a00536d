//! Gene identifier resolution: namespace detection, version collapsing and
//! translation to gene symbols

mod namespace;
mod normalize;
mod translate;

pub use namespace::{detect_namespace, DetectionParams, IdNamespace, NamespaceDetector};
pub use normalize::{collapse_versions, normalize_identifiers, strip_ensembl_version, Resolution, ResolutionStats};
pub use translate::{
    parse_mygene_response, translate_batched, AnyTranslator, IdentifierTranslator, MyGeneTranslator,
    TableTranslator, Translation, TranslationParams,
};
