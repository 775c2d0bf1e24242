use std::fmt;

/// Queue priority of a task.
///
/// Variants are declared in service order: `Immediate` is served first and
/// `Languid` last. Within one priority, tasks are served in submission order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Immediate,
    Urgent,
    High,
    #[default]
    Normal,
    Low,
    Languid,
}

impl Priority {
    /// All priorities in service order.
    pub const ALL: [Priority; 6] = [
        Priority::Immediate,
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Languid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Immediate => "IMMEDIATE",
            Priority::Urgent => "URGENT",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
            Priority::Languid => "LANGUID",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
