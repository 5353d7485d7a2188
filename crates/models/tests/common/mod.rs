//! Common test utilities

use spanner_core::{
    Chunk, DropoutRates, EmbedderConfig, EncoderConfig, Example, SpanClassifierConfig,
    SpanModelConfig, TrainingConfig,
};

/// Small labeled corpus
pub fn corpus() -> Vec<Example> {
    vec![
        Example::with_chunks(
            ["John", "lives", "in", "New", "York"],
            vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)],
        ),
        Example::with_chunks(
            ["Acme", "hired", "Mary", "in", "Paris"],
            vec![Chunk::new("ORG", 0, 1), Chunk::new("PER", 2, 3), Chunk::new("LOC", 4, 5)],
        ),
        Example::with_chunks(["Nothing", "happened"], Vec::new()),
    ]
}

/// Tiny model without dropout so runs are reproducible
pub fn tiny_config(encoder: Option<EncoderConfig>) -> SpanModelConfig {
    SpanModelConfig::new()
        .with_embedder(EmbedderConfig::default().with_emb_dim(16))
        .with_encoder(encoder.map(|e| {
            e.with_in_drop_rates(DropoutRates::none())
                .with_hid_drop_rate(0.0)
        }))
        .with_decoder(
            SpanClassifierConfig::new()
                .with_max_span_size(3)
                .with_size_emb_dim(4)
                .with_in_drop_rates(DropoutRates::none()),
        )
}

/// Full-batch training on the CPU
pub fn tiny_training(num_epochs: usize) -> TrainingConfig {
    TrainingConfig::new()
        .with_learning_rate(1e-2)
        .with_batch_size(8)
        .with_num_epochs(num_epochs)
        .with_seed(0)
}
