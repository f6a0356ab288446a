//! Default annotation sink.

use stampede_interfaces::AnnotationSink;
use tracing::info;

/// Annotation sink that only logs the markers. Deployments with a
/// metrics gauge plug their own implementation in instead.
#[derive(Debug, Default, Clone)]
pub struct LogAnnotationSink;

impl AnnotationSink for LogAnnotationSink {
    fn inc(&self, title: &str, run_id: i64, link: &str) {
        info!(title, run_id, link, "load testing started");
    }

    fn dec(&self, title: &str, run_id: i64, link: &str) {
        info!(title, run_id, link, "load testing stopped");
    }
}
