pub mod device;

pub use device::DeviceChoice;

use crate::error::{Error, Result};
use candle_core::{pickle, DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::Tokenizer;

/// Materializes a model and its tokenizer from a local artifact directory.
pub trait ArtifactLoader: Send + Sync {
    type Model: Send + Sync + 'static;
    type Tokenizer: Send + Sync + 'static;

    fn load(&self, model_dir: &Path) -> Result<(Self::Model, Self::Tokenizer)>;
}

/// Loads seq2seq checkpoints with candle onto a fixed device.
pub struct CandleLoader {
    device: Device,
}

impl CandleLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn from_choice(choice: DeviceChoice) -> Result<Self> {
        Ok(Self::new(choice.select()?))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl ArtifactLoader for CandleLoader {
    type Model = Seq2SeqModel;
    type Tokenizer = Tokenizer;

    fn load(&self, model_dir: &Path) -> Result<(Seq2SeqModel, Tokenizer)> {
        let model = Seq2SeqModel::load(model_dir, self.device.clone())?;
        let tokenizer = load_tokenizer(model_dir)?;
        Ok((model, tokenizer))
    }
}

pub enum Architecture {
    T5(Box<t5::T5ForConditionalGeneration>),
    /// Checkpoint types without a candle implementation (LED, BART, ...):
    /// the raw weights, resident on the model's device.
    Weights(HashMap<String, Tensor>),
}

pub struct Seq2SeqModel {
    model_type: String,
    weights_path: PathBuf,
    device: Device,
    d_model: usize,
    encoder_layers: usize,
    decoder_layers: usize,
    vocab_size: usize,
    max_input_positions: Option<usize>,
    architecture: Architecture,
}

impl Seq2SeqModel {
    pub fn load(model_dir: &Path, device: Device) -> Result<Self> {
        tracing::info!("Loading model from: {:?}", model_dir);

        let config_path = model_dir.join("config.json");
        let config_content = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to read config: {}", e)))?;

        let config: Value = serde_json::from_str(&config_content)
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to parse config: {}", e)))?;

        let model_type = config
            .get("model_type")
            .and_then(|v| v.as_str())
            .unwrap_or("led")
            .to_string();

        let d_model = config_usize(&config, &["d_model", "hidden_size"]).ok_or_else(|| {
            Error::ModelLoadFailed("Could not determine model dimension".to_string())
        })?;
        let encoder_layers = config_usize(&config, &["encoder_layers", "num_layers"]).unwrap_or(12);
        let decoder_layers =
            config_usize(&config, &["decoder_layers", "num_decoder_layers"]).unwrap_or(encoder_layers);
        let vocab_size = config_usize(&config, &["vocab_size"]).unwrap_or(0);
        let max_input_positions = config_usize(
            &config,
            &["max_encoder_position_embeddings", "max_position_embeddings"],
        );

        ensure_safetensors(model_dir)?;
        let weights_path = model_dir.join("model.safetensors");
        if !weights_path.exists() {
            return Err(Error::ModelLoadFailed(format!(
                "No model weights in {}",
                model_dir.display()
            )));
        }

        let architecture = if model_type == "t5" {
            let t5_config: t5::Config = serde_json::from_value(config)
                .map_err(|e| Error::ModelLoadFailed(format!("Invalid t5 config: {}", e)))?;
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                    .map_err(|e| Error::ModelLoadFailed(format!("Failed to map weights: {}", e)))?
            };
            let model = t5::T5ForConditionalGeneration::load(vb, &t5_config)
                .map_err(|e| Error::ModelLoadFailed(format!("Failed to build t5 model: {}", e)))?;
            Architecture::T5(Box::new(model))
        } else {
            let tensors = candle_core::safetensors::load(&weights_path, &device)
                .map_err(|e| Error::ModelLoadFailed(format!("Failed to load safetensors: {}", e)))?;
            tracing::info!("  Tensors: {}", tensors.len());
            Architecture::Weights(tensors)
        };

        tracing::info!("Model loaded successfully");
        tracing::info!("  Type: {}", model_type);
        tracing::info!("  Model dimension: {}", d_model);
        tracing::info!("  Encoder/decoder layers: {}/{}", encoder_layers, decoder_layers);
        tracing::info!("  Device: {:?}", device);

        Ok(Self {
            model_type,
            weights_path,
            device,
            d_model,
            encoder_layers,
            decoder_layers,
            vocab_size,
            max_input_positions,
            architecture,
        })
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn layers(&self) -> (usize, usize) {
        (self.encoder_layers, self.decoder_layers)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn max_input_positions(&self) -> Option<usize> {
        self.max_input_positions
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }
}

fn config_usize(config: &Value, keys: &[&str]) -> Option<usize> {
    keys.iter()
        .find_map(|key| config.get(*key).and_then(|v| v.as_u64()))
        .map(|v| v as usize)
}

/// `tokenizer.json` when present, otherwise a byte-level BPE from
/// `vocab.json` + `merges.txt` (the layout of LED and BART checkpoints).
pub fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    if tokenizer_path.exists() {
        return Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to load tokenizer: {}", e)));
    }

    let vocab = model_dir.join("vocab.json");
    let merges = model_dir.join("merges.txt");
    if !vocab.exists() || !merges.exists() {
        return Err(Error::ModelLoadFailed(format!(
            "No tokenizer files in {}",
            model_dir.display()
        )));
    }

    let (vocab, merges) = (vocab.to_string_lossy(), merges.to_string_lossy());
    let bpe = BPE::from_file(&vocab, &merges)
        .build()
        .map_err(|e| Error::ModelLoadFailed(format!("Failed to build BPE tokenizer: {}", e)))?;

    let mut tokenizer = Tokenizer::new(bpe);
    tokenizer
        .with_pre_tokenizer(Some(ByteLevel::default()))
        .with_decoder(Some(ByteLevel::default()));

    Ok(tokenizer)
}

/// Converts a `pytorch_model.bin` checkpoint to `model.safetensors` in place.
fn ensure_safetensors(model_dir: &Path) -> Result<()> {
    let pytorch_file = model_dir.join("pytorch_model.bin");
    let safetensors_file = model_dir.join("model.safetensors");

    if safetensors_file.exists() || !pytorch_file.exists() {
        return Ok(());
    }

    tracing::info!("Converting pytorch_model.bin to model.safetensors...");

    let tensors_vec = pickle::read_all(&pytorch_file)
        .map_err(|e| Error::ModelLoadFailed(format!("Failed to read PyTorch file: {}", e)))?;

    tracing::info!("Loading {} tensors from PyTorch model", tensors_vec.len());

    let tensors: HashMap<_, _> = tensors_vec.into_iter().collect();

    candle_core::safetensors::save(&tensors, &safetensors_file)
        .map_err(|e| Error::ModelLoadFailed(format!("Failed to save SafeTensors: {}", e)))?;

    tracing::info!("Converted to SafeTensors format");

    if let Err(e) = std::fs::remove_file(&pytorch_file) {
        tracing::warn!("Could not remove pytorch_model.bin: {}", e);
    }

    Ok(())
}
