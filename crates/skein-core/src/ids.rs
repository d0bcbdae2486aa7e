use ulid::Ulid;

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// Source of run and message identifiers.
///
/// The default generator produces ULIDs: unique and time-ordered, so id sort
/// roughly follows creation order even though transcript ordering always goes
/// through commit ordinals. Tests inject [`SequentialGenerator`] to get
/// byte-identical output across runs.
pub trait IdGenerator: Send {
    fn next_id(&mut self) -> String;
}

/// ULID generator, monotonic within this process.
pub struct UlidGenerator {
    inner: ulid::Generator,
}

impl UlidGenerator {
    pub fn new() -> Self {
        UlidGenerator {
            inner: ulid::Generator::new(),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn next_id(&mut self) -> String {
        // The monotonic generator only fails when the random component
        // overflows within one millisecond; a fresh ULID is still unique.
        match self.inner.generate() {
            Ok(id) => id.to_string(),
            Err(_) => Ulid::new().to_string(),
        }
    }
}

/// Deterministic counter-based generator for tests.
pub struct SequentialGenerator {
    prefix: String,
    counter: u64,
}

impl SequentialGenerator {
    pub fn new(prefix: &str) -> Self {
        SequentialGenerator {
            prefix: prefix.to_owned(),
            counter: 0,
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}{:08}", self.prefix, self.counter)
    }
}
