//! Metric instruments.

use crate::config::CounterConfig;
use crate::error::SmokeError;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use std::collections::BTreeMap;

const MAX_INSTRUMENT_NAME_LEN: usize = 255;

/// A monotonic counter. It only goes up.
#[derive(Clone)]
pub struct MonotonicCounter {
    name: String,
    inner: Counter<u64>,
}

impl MonotonicCounter {
    pub(crate) fn new(meter: &Meter, config: &CounterConfig) -> Result<Self, SmokeError> {
        validate_instrument_name(&config.name)?;

        let inner = meter
            .u64_counter(config.name.clone())
            .with_description(config.description.clone())
            .with_unit(config.unit.clone())
            .build();

        Ok(Self {
            name: config.name.clone(),
            inner,
        })
    }

    /// Instrument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `value` to the counter under the given attribute set.
    pub fn add(&self, value: u64, attributes: &[KeyValue]) {
        self.inner.add(value, attributes);
    }

    /// Adds a signed `value`, rejecting anything below zero.
    ///
    /// # Errors
    ///
    /// Returns [`SmokeError::NegativeIncrement`] for negative values. Nothing
    /// is recorded in that case.
    pub fn try_add(&self, value: i64, attributes: &[KeyValue]) -> Result<(), SmokeError> {
        let value = u64::try_from(value).map_err(|_| SmokeError::NegativeIncrement { value })?;
        self.add(value, attributes);
        Ok(())
    }
}

impl std::fmt::Debug for MonotonicCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonotonicCounter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Converts a string attribute map into OpenTelemetry key-values.
pub fn key_values(attributes: &BTreeMap<String, String>) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect()
}

/// The SDK quietly hands out a no-op instrument for names it doesn't accept,
/// so reject them up front instead.
fn validate_instrument_name(name: &str) -> Result<(), SmokeError> {
    let invalid = || SmokeError::InvalidInstrument {
        name: name.to_string(),
    };

    if name.is_empty() || name.len() > MAX_INSTRUMENT_NAME_LEN {
        return Err(invalid());
    }

    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
        return Err(invalid());
    }

    Ok(())
}
