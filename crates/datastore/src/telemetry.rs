use std::fmt;

/// The mutating operation a telemetry event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMethod {
    Added,
    Updated,
    Deleted,
}

impl MetricMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricMethod::Added => "added",
            MetricMethod::Updated => "updated",
            MetricMethod::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MetricMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry event, delivered after the operation's write has been
/// acknowledged and before its result is returned.
///
/// `fields` is the comma-joined dotted-path list of changed fields;
/// it is only present for `updated` events with a non-empty diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub method: MetricMethod,
    pub id: String,
    pub fields: Option<String>,
}

/// Host-supplied telemetry hook. Invoked synchronously from inside the
/// operation; keep it cheap.
pub type MetricHook = Box<dyn Fn(&MetricEvent) + Send + Sync>;
