//! SCPI-style instrument error queue
use std::{borrow::Cow, collections::VecDeque, fmt};

/// A `(code, message)` pair reported by the "next error" query
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentError {
    /// Numeric error code, negative for standard SCPI errors
    pub code: i32,
    /// Human-readable message
    pub message: Cow<'static, str>,
}

impl InstrumentError {
    /// Builds an error with a static message
    pub const fn new(code: i32, message: &'static str) -> Self {
        Self {
            code,
            message: Cow::Borrowed(message),
        }
    }

    /// Builds an error with a formatted message
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Cow::Owned(message.into()),
        }
    }

    /// Appends detail to the message, SCPI style (`Message; detail`)
    #[must_use]
    pub fn detail(self, detail: impl fmt::Display) -> Self {
        Self::with_message(self.code, format!("{}; {detail}", self.message))
    }

    /// Checks whether this is the "no error" sentinel
    pub fn is_none(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Sentinel returned when the queue is empty
pub const NO_ERROR: InstrumentError = InstrumentError::new(0, "No error");
/// Generic command error
pub const COMMAND_ERROR: InstrumentError =
    InstrumentError::new(-100, "Command error");
/// Unparseable command
pub const SYNTAX_ERROR: InstrumentError =
    InstrumentError::new(-102, "Syntax error");
/// Argument of the wrong type (e.g. text where a number was expected)
pub const DATA_TYPE_ERROR: InstrumentError =
    InstrumentError::new(-104, "Data type error");
/// Argument given to a command that takes none
pub const PARAMETER_NOT_ALLOWED: InstrumentError =
    InstrumentError::new(-108, "Parameter not allowed");
/// Required argument is missing
pub const MISSING_PARAMETER: InstrumentError =
    InstrumentError::new(-109, "Missing parameter");
/// Command header is not recognized
pub const UNDEFINED_HEADER: InstrumentError =
    InstrumentError::new(-113, "Undefined header");
/// Numeric argument outside the legal range
pub const DATA_OUT_OF_RANGE: InstrumentError =
    InstrumentError::new(-222, "Data out of range");
/// Argument is not one of the allowed choices
pub const ILLEGAL_PARAMETER: InstrumentError =
    InstrumentError::new(-224, "Illegal parameter value");
/// Replaces the newest entry when the queue is full
pub const QUEUE_OVERFLOW: InstrumentError =
    InstrumentError::new(-350, "Queue overflow");

/// Default number of entries held before overflowing
pub const DEFAULT_CAPACITY: usize = 10;

/// First-in, first-out error queue
///
/// When the queue is full, the newest entry is replaced by
/// [`QUEUE_OVERFLOW`] and further errors are dropped until an entry is
/// read out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorQueue {
    entries: VecDeque<InstrumentError>,
    capacity: usize,
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorQueue {
    /// Builds an empty queue with [`DEFAULT_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Builds an empty queue holding at most `capacity` entries
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues an error
    pub fn push(&mut self, e: InstrumentError) {
        log::debug!("queued instrument error {e}");
        if self.entries.len() < self.capacity {
            self.entries.push_back(e);
        } else if let Some(last) = self.entries.back_mut() {
            *last = QUEUE_OVERFLOW;
        }
    }

    /// Removes and returns the oldest error, or [`NO_ERROR`] when empty
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> InstrumentError {
        self.entries.pop_front().unwrap_or(NO_ERROR)
    }

    /// Discards every queued error
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of queued errors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over queued errors, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &InstrumentError> {
        self.entries.iter()
    }
}
