//! Service layer
//!
//! Services are the pipeline's seams to the outside world: fetching source,
//! classifying it, checking a started app answers, and reporting progress.
//!
//! All services are trait-based to enable testing and dependency injection.

pub mod detector;
pub mod fetcher;
pub mod notifier;
pub mod readiness;

// Re-export traits
pub use detector::ProjectDetector;
pub use fetcher::SourceFetcher;
pub use notifier::OutcomeNotifier;
pub use readiness::ReadinessProbe;

// Re-export implementations
pub use detector::NodeProjectDetector;
pub use fetcher::GitFetcher;
pub use notifier::{HttpNotifier, LogNotifier, NotifierSet};
pub use readiness::HttpReadinessProbe;
