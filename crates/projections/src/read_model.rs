//! Read model trait for query-side views.

/// A denormalized view kept current by a projection.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entries, or 0 while a writer holds the view.
    fn count(&self) -> usize;
}
