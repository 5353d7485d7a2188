//! Configuration of embedders, encoders and the span classifier

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Dropout rates applied to a layer input: (dropout, word dropout, locked dropout)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropoutRates {
    /// Element-wise dropout
    pub dropout: f32,

    /// Probability of zeroing a whole token vector
    pub word: f32,

    /// Dropout with one mask shared across time steps
    pub locked: f32,
}

impl DropoutRates {
    /// Create dropout rates
    pub const fn new(dropout: f32, word: f32, locked: f32) -> Self {
        Self {
            dropout,
            word,
            locked,
        }
    }

    /// No dropout at all
    pub const fn none() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Check every rate lies in `[0, 1)`
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("dropout", self.dropout),
            ("word", self.word),
            ("locked", self.locked),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Configuration(format!(
                    "{} rate must be in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

impl Default for DropoutRates {
    fn default() -> Self {
        Self::none()
    }
}

/// Loss applied to span logits
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Criterion {
    /// Plain cross-entropy
    CrossEntropy,

    /// Focal loss (Lin et al., 2017)
    Focal {
        /// Focusing parameter; 0 reduces to cross-entropy
        gamma: f32,
    },

    /// Cross-entropy against label-smoothed targets
    SmoothLabel {
        /// Probability mass spread uniformly over all labels
        epsilon: f32,
    },
}

impl Criterion {
    /// Default focusing parameter of focal loss
    pub const DEFAULT_GAMMA: f32 = 2.0;

    /// Default smoothing mass of label smoothing
    pub const DEFAULT_EPSILON: f32 = 0.1;

    /// Focal loss with the default focusing parameter
    pub fn focal() -> Self {
        Self::Focal {
            gamma: Self::DEFAULT_GAMMA,
        }
    }

    /// Label-smoothed cross-entropy with the default smoothing mass
    pub fn smooth_label() -> Self {
        Self::SmoothLabel {
            epsilon: Self::DEFAULT_EPSILON,
        }
    }

    /// Short name used in model names
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::CrossEntropy => "CE",
            Self::Focal { .. } => "FL",
            Self::SmoothLabel { .. } => "SL",
        }
    }

    /// Check the criterion parameters
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::CrossEntropy => Ok(()),
            Self::Focal { gamma } if gamma < 0.0 || !gamma.is_finite() => Err(
                Error::Configuration(format!("focal gamma must be non-negative, got {}", gamma)),
            ),
            Self::SmoothLabel { epsilon } if !(0.0..=1.0).contains(&epsilon) => {
                Err(Error::Configuration(format!(
                    "smoothing epsilon must be in [0, 1], got {}",
                    epsilon
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Criterion {
    fn default() -> Self {
        Self::CrossEntropy
    }
}

impl FromStr for Criterion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ce" => Ok(Self::CrossEntropy),
            "fl" => Ok(Self::focal()),
            "sl" => Ok(Self::smooth_label()),
            other => Err(Error::Configuration(format!(
                "unknown criterion `{}`, expected one of CE, FL, SL",
                other
            ))),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Reduction of the hidden states inside a span
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggMode {
    /// Element-wise maximum over time
    #[default]
    MaxPooling,

    /// Element-wise mean over time
    MeanPooling,

    /// Element-wise minimum over time
    MinPooling,
}

impl AggMode {
    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Self::MaxPooling => "max_pooling",
            Self::MeanPooling => "mean_pooling",
            Self::MinPooling => "min_pooling",
        }
    }
}

impl FromStr for AggMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "max_pooling" | "max" => Ok(Self::MaxPooling),
            "mean_pooling" | "mean" => Ok(Self::MeanPooling),
            "min_pooling" | "min" => Ok(Self::MinPooling),
            other => Err(Error::Configuration(format!(
                "unknown aggregation mode `{}`",
                other
            ))),
        }
    }
}

/// Span classification decoder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanClassifierConfig {
    /// Dropout applied to span features before the projection
    pub in_drop_rates: DropoutRates,

    /// Cap on sampled negative spans per training example
    pub num_neg_chunks: usize,

    /// Longest enumerated span; also the size embedding table length
    pub max_span_size: usize,

    /// Width of the span size embedding
    pub size_emb_dim: usize,

    /// Pooling over the tokens of a span
    pub agg_mode: AggMode,

    /// Training loss
    pub criterion: Criterion,

    /// Reserved label meaning "not an entity"
    pub none_label: String,
}

impl Default for SpanClassifierConfig {
    fn default() -> Self {
        Self {
            in_drop_rates: DropoutRates::new(0.5, 0.0, 0.0),
            num_neg_chunks: 100,
            max_span_size: 10,
            size_emb_dim: 25,
            agg_mode: AggMode::default(),
            criterion: Criterion::default(),
            none_label: "<none>".to_string(),
        }
    }
}

impl SpanClassifierConfig {
    /// Create default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the negative sampling cap
    pub fn with_num_neg_chunks(mut self, num_neg_chunks: usize) -> Self {
        self.num_neg_chunks = num_neg_chunks;
        self
    }

    /// Set the maximum span size
    pub fn with_max_span_size(mut self, max_span_size: usize) -> Self {
        self.max_span_size = max_span_size;
        self
    }

    /// Set the size embedding width
    pub fn with_size_emb_dim(mut self, size_emb_dim: usize) -> Self {
        self.size_emb_dim = size_emb_dim;
        self
    }

    /// Set the pooling mode
    pub fn with_agg_mode(mut self, agg_mode: AggMode) -> Self {
        self.agg_mode = agg_mode;
        self
    }

    /// Set the criterion
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the criterion by its short name (`CE`, `FL` or `SL`)
    pub fn with_criterion_name(self, name: &str) -> Result<Self> {
        Ok(self.with_criterion(name.parse()?))
    }

    /// Set the input dropout rates
    pub fn with_in_drop_rates(mut self, rates: DropoutRates) -> Self {
        self.in_drop_rates = rates;
        self
    }

    /// Set the none label
    pub fn with_none_label(mut self, none_label: impl Into<String>) -> Self {
        self.none_label = none_label.into();
        self
    }

    /// Model name fragment, e.g. `max_pooling-CE`
    pub fn name(&self) -> String {
        format!("{}-{}", self.agg_mode.name(), self.criterion)
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_span_size == 0 {
            return Err(Error::Configuration(
                "max_span_size must be at least 1".to_string(),
            ));
        }
        if self.none_label.is_empty() {
            return Err(Error::Configuration("none_label must not be empty".to_string()));
        }
        self.in_drop_rates.validate()?;
        self.criterion.validate()
    }
}

/// Sequence encoder architecture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderArch {
    /// Pass-through
    Identity,

    /// Bidirectional LSTM
    Lstm,

    /// Bidirectional GRU
    Gru,

    /// Gated convolutional stack (Gehring et al., 2017)
    Conv,

    /// Self-attention stack (Vaswani et al., 2017)
    Transformer,
}

impl EncoderArch {
    /// Check if the architecture is recurrent
    pub fn is_recurrent(&self) -> bool {
        matches!(self, Self::Lstm | Self::Gru)
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "Identity",
            Self::Lstm => "LSTM",
            Self::Gru => "GRU",
            Self::Conv => "CNN",
            Self::Transformer => "Transformer",
        }
    }
}

impl FromStr for EncoderArch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            "cnn" | "conv" => Ok(Self::Conv),
            "transformer" => Ok(Self::Transformer),
            other => Err(Error::Configuration(format!(
                "invalid encoder architecture `{}`",
                other
            ))),
        }
    }
}

/// Sequence encoder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Architecture
    pub arch: EncoderArch,

    /// Apply a square linear projection to the (dropped-out) input
    pub in_proj: bool,

    /// Concatenate the raw input to the encoder output
    pub shortcut: bool,

    /// Output width of non-identity encoders
    pub hid_dim: usize,

    /// Number of stacked layers
    pub num_layers: usize,

    /// Dropout applied to the input
    pub in_drop_rates: DropoutRates,

    /// Dropout inside and between layers
    pub hid_drop_rate: f32,

    /// Learn the initial recurrent state
    pub train_init_hidden: bool,

    /// Convolution width
    pub kernel_size: usize,

    /// Attention heads
    pub nhead: usize,

    /// Width of the attention feed-forward layer
    pub pf_dim: usize,
}

impl EncoderConfig {
    /// Create a config with the architecture defaults
    pub fn new(arch: EncoderArch) -> Self {
        let (num_layers, in_drop_rates, hid_drop_rate) = match arch {
            EncoderArch::Identity => (0, DropoutRates::none(), 0.0),
            EncoderArch::Lstm | EncoderArch::Gru => (1, DropoutRates::new(0.5, 0.0, 0.0), 0.5),
            EncoderArch::Conv => (3, DropoutRates::new(0.25, 0.0, 0.0), 0.25),
            EncoderArch::Transformer => (3, DropoutRates::new(0.1, 0.0, 0.0), 0.1),
        };
        Self {
            arch,
            in_proj: false,
            shortcut: false,
            hid_dim: 128,
            num_layers,
            in_drop_rates,
            hid_drop_rate,
            train_init_hidden: false,
            kernel_size: 3,
            nhead: 8,
            pf_dim: 256,
        }
    }

    /// Identity encoder
    pub fn identity() -> Self {
        Self::new(EncoderArch::Identity)
    }

    /// Bidirectional LSTM encoder
    pub fn lstm() -> Self {
        Self::new(EncoderArch::Lstm)
    }

    /// Bidirectional GRU encoder
    pub fn gru() -> Self {
        Self::new(EncoderArch::Gru)
    }

    /// Convolutional encoder
    pub fn conv() -> Self {
        Self::new(EncoderArch::Conv)
    }

    /// Transformer encoder
    pub fn transformer() -> Self {
        Self::new(EncoderArch::Transformer)
    }

    /// Set hidden width
    pub fn with_hid_dim(mut self, hid_dim: usize) -> Self {
        self.hid_dim = hid_dim;
        self
    }

    /// Set number of layers
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Enable/disable the input projection
    pub fn with_in_proj(mut self, in_proj: bool) -> Self {
        self.in_proj = in_proj;
        self
    }

    /// Enable/disable the shortcut
    pub fn with_shortcut(mut self, shortcut: bool) -> Self {
        self.shortcut = shortcut;
        self
    }

    /// Set input dropout rates
    pub fn with_in_drop_rates(mut self, rates: DropoutRates) -> Self {
        self.in_drop_rates = rates;
        self
    }

    /// Set hidden dropout rate
    pub fn with_hid_drop_rate(mut self, rate: f32) -> Self {
        self.hid_drop_rate = rate;
        self
    }

    /// Learn the initial recurrent state
    pub fn with_train_init_hidden(mut self, train_init_hidden: bool) -> Self {
        self.train_init_hidden = train_init_hidden;
        self
    }

    /// Set convolution width
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Set attention heads and feed-forward width
    pub fn with_attention(mut self, nhead: usize, pf_dim: usize) -> Self {
        self.nhead = nhead;
        self.pf_dim = pf_dim;
        self
    }

    /// Output width for an input of width `in_dim`
    pub fn out_dim(&self, in_dim: usize) -> usize {
        let out_dim = match self.arch {
            EncoderArch::Identity => in_dim,
            _ => self.hid_dim,
        };
        if self.shortcut {
            out_dim + in_dim
        } else {
            out_dim
        }
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        self.in_drop_rates.validate()?;
        if !(0.0..1.0).contains(&self.hid_drop_rate) {
            return Err(Error::Configuration(format!(
                "hid_drop_rate must be in [0, 1), got {}",
                self.hid_drop_rate
            )));
        }
        if self.arch == EncoderArch::Identity {
            return Ok(());
        }
        if self.hid_dim == 0 || self.num_layers == 0 {
            return Err(Error::Configuration(format!(
                "{} encoder needs hid_dim and num_layers of at least 1",
                self.arch.name()
            )));
        }
        match self.arch {
            EncoderArch::Lstm | EncoderArch::Gru if self.hid_dim % 2 != 0 => {
                Err(Error::Configuration(format!(
                    "bidirectional encoder needs an even hid_dim, got {}",
                    self.hid_dim
                )))
            }
            EncoderArch::Conv if self.kernel_size % 2 == 0 => Err(Error::Configuration(format!(
                "kernel_size must be odd, got {}",
                self.kernel_size
            ))),
            EncoderArch::Transformer if self.nhead == 0 || self.hid_dim % self.nhead != 0 => {
                Err(Error::Configuration(format!(
                    "hid_dim {} is not divisible by {} heads",
                    self.hid_dim, self.nhead
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::lstm()
    }
}

/// Token lookup embedder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Embedding width
    pub emb_dim: usize,

    /// Minimum training frequency for a token to enter the vocabulary
    pub min_freq: usize,

    /// Lowercase tokens before lookup
    pub lowercase: bool,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            emb_dim: 100,
            min_freq: 1,
            lowercase: false,
        }
    }
}

impl EmbedderConfig {
    /// Set embedding width
    pub fn with_emb_dim(mut self, emb_dim: usize) -> Self {
        self.emb_dim = emb_dim;
        self
    }

    /// Set minimum token frequency
    pub fn with_min_freq(mut self, min_freq: usize) -> Self {
        self.min_freq = min_freq;
        self
    }

    /// Enable/disable lowercasing
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }
}

/// Full model configuration: embedder, optional encoder, span decoder
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanModelConfig {
    /// Token embedder
    pub embedder: EmbedderConfig,

    /// Encoder between embeddings and span features; absent means identity
    #[serde(default)]
    pub encoder: Option<EncoderConfig>,

    /// Span classification decoder
    pub decoder: SpanClassifierConfig,
}

impl SpanModelConfig {
    /// Create a config with a BiLSTM encoder
    pub fn new() -> Self {
        Self {
            encoder: Some(EncoderConfig::lstm()),
            ..Default::default()
        }
    }

    /// Set the embedder
    pub fn with_embedder(mut self, embedder: EmbedderConfig) -> Self {
        self.embedder = embedder;
        self
    }

    /// Set or remove the encoder
    pub fn with_encoder(mut self, encoder: Option<EncoderConfig>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Set the decoder
    pub fn with_decoder(mut self, decoder: SpanClassifierConfig) -> Self {
        self.decoder = decoder;
        self
    }

    /// Width of the hidden states handed to the decoder
    pub fn full_hid_dim(&self) -> usize {
        match &self.encoder {
            Some(encoder) => encoder.out_dim(self.embedder.emb_dim),
            None => self.embedder.emb_dim,
        }
    }

    /// Model name, e.g. `LSTM-max_pooling-CE`
    pub fn name(&self) -> String {
        match &self.encoder {
            Some(encoder) => format!("{}-{}", encoder.arch.name(), self.decoder.name()),
            None => self.decoder.name(),
        }
    }

    /// Check every component
    pub fn validate(&self) -> Result<()> {
        if self.embedder.emb_dim == 0 {
            return Err(Error::Configuration("emb_dim must be at least 1".to_string()));
        }
        if let Some(encoder) = &self.encoder {
            encoder.validate()?;
        }
        self.decoder.validate()
    }

    /// Load from JSON file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: SpanModelConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }
}
