//! Standard reference sentinel modules (`spec.md` §4.8).

pub mod auto_tag;
pub mod compression_advisor;
pub mod dedup_advisor;
pub mod gdpr;
pub mod integrity;
pub mod pii;
pub mod relationship;
pub mod sentiment;
pub mod steganography;

pub use auto_tag::AutoTagger;
pub use compression_advisor::CompressionAdvisor;
pub use dedup_advisor::DeduplicationAdvisor;
pub use gdpr::GdprModule;
pub use integrity::IntegrityChecker;
pub use pii::PiiDetector;
pub use relationship::RelationshipMapper;
pub use sentiment::SentimentAnalyzer;
pub use steganography::SteganographyDetector;
