use serde::{Deserialize, Serialize};

/// Per-response token usage, raw from the model provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Run-level totals, incremented once per model round-trip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatedTokens {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub turn_count: u32,
}

impl AccumulatedTokens {
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.total_input_tokens += u64::from(usage.input_tokens);
        self.total_output_tokens += u64::from(usage.output_tokens);
        self.turn_count += 1;
    }

    pub fn total(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}
