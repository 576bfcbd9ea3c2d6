//! Property-based test generators using proptest.
//!
//! Strategies produce values that fit the fixture schema, so generated
//! documents always pass column checks.

use proptest::prelude::*;

/// Strategy for names that fit the fixture's 40-character text columns.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,15}").expect("Invalid regex")
}

/// Strategy for phone numbers that fit the `Phones.number` column.
pub fn phone_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("\\+[0-9]{6,15}").expect("Invalid regex")
}

/// Strategy for blob payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// One step applied to a committed person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStep {
    /// Change the first name.
    SetFirst(String),
    /// Change the last name.
    SetLast(String),
    /// Add a phone number.
    AddPhone(String),
    /// Open for edit and apply without changing anything.
    Touch,
}

/// Strategy for a single edit step.
pub fn edit_step_strategy() -> impl Strategy<Value = EditStep> {
    prop_oneof![
        3 => name_strategy().prop_map(EditStep::SetFirst),
        3 => name_strategy().prop_map(EditStep::SetLast),
        2 => phone_strategy().prop_map(EditStep::AddPhone),
        1 => Just(EditStep::Touch),
    ]
}

/// Strategy for a sequence of edit steps.
pub fn edit_sequence_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<EditStep>> {
    prop::collection::vec(edit_step_strategy(), min..max)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
