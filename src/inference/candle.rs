//! Native causal-LM generation with candle
//!
//! Loads a snapshot directory (config.json, tokenizer.json, safetensors) into
//! one of the supported architectures and samples continuations token by token.

use super::device::DeviceProfile;
use super::{GeneratedText, SamplingParams, TextGenerator, lock_model};
use crate::config::Precision;
use crate::error::{GenerationError, LoadError};
use crate::models::metadata::{self, ModelMetadata};
use candle_core::{DType, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::{llama, phi3};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Options for [`CandleGenerator::load`]
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub precision: Precision,
    pub return_full_text: bool,
}

enum CausalLm {
    Phi3(phi3::Model),
    Llama {
        model: llama::Llama,
        config: llama::Config,
        dtype: DType,
    },
}

/// Per-call decoding state. Llama keeps its KV cache outside the model.
enum DecodeState<'a> {
    Phi3(&'a mut phi3::Model),
    Llama {
        model: &'a llama::Llama,
        cache: llama::Cache,
    },
}

impl CausalLm {
    fn architecture(&self) -> &'static str {
        match self {
            CausalLm::Phi3(_) => "phi3",
            CausalLm::Llama { .. } => "llama",
        }
    }

    fn begin(&mut self, profile: &DeviceProfile) -> Result<DecodeState<'_>, GenerationError> {
        match self {
            CausalLm::Phi3(model) => {
                model.clear_kv_cache();
                Ok(DecodeState::Phi3(model))
            }
            CausalLm::Llama {
                model,
                config,
                dtype,
            } => Ok(DecodeState::Llama {
                model,
                cache: llama::Cache::new(true, *dtype, config, &profile.device)?,
            }),
        }
    }
}

impl DecodeState<'_> {
    fn forward(&mut self, input: &Tensor, offset: usize) -> Result<Tensor, GenerationError> {
        let logits = match self {
            DecodeState::Phi3(model) => model.forward(input, offset)?,
            DecodeState::Llama { model, cache } => model.forward(input, offset, cache)?,
        };
        Ok(logits)
    }
}

/// Candle-backed [`TextGenerator`]
pub struct CandleGenerator {
    snapshot_dir: PathBuf,
    profile: DeviceProfile,
    tokenizer: Tokenizer,
    metadata: ModelMetadata,
    return_full_text: bool,
    model: Mutex<CausalLm>,
}

impl CandleGenerator {
    /// Load model and tokenizer from a resolved snapshot directory
    pub fn load(
        snapshot_dir: &Path,
        profile: DeviceProfile,
        options: &LoadOptions,
    ) -> Result<Self, LoadError> {
        let metadata = metadata::parse_model_config(snapshot_dir)?;

        let tokenizer_path = snapshot_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| LoadError::Tokenizer(format!("{}: {}", tokenizer_path.display(), e)))?;

        let dtype = profile.select_dtype(options.precision, metadata.torch_dtype.as_deref());
        let weights = metadata::weight_files(snapshot_dir)?;

        tracing::info!(
            model_type = %metadata.model_type,
            dtype = ?dtype,
            weight_files = weights.len(),
            "Loading model weights"
        );

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &profile.device)? };

        let config_path = snapshot_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path).map_err(|source| LoadError::Io {
            path: config_path.clone(),
            source,
        })?;
        let invalid = |e: serde_json::Error| LoadError::InvalidConfig {
            path: config_path.clone(),
            message: e.to_string(),
        };

        let model = match metadata.model_type.as_str() {
            "phi3" => {
                let config: phi3::Config = serde_json::from_str(&config_str).map_err(invalid)?;
                CausalLm::Phi3(phi3::Model::new(&config, vb)?)
            }
            "llama" => {
                let config: llama::LlamaConfig =
                    serde_json::from_str(&config_str).map_err(invalid)?;
                let config = config.into_config(false);
                CausalLm::Llama {
                    model: llama::Llama::load(vb, &config)?,
                    config,
                    dtype,
                }
            }
            other => return Err(LoadError::UnsupportedArchitecture(other.to_string())),
        };

        tracing::info!(
            snapshot = ?snapshot_dir,
            architecture = model.architecture(),
            device = ?profile.kind,
            "Model loaded from local snapshot"
        );

        Ok(Self {
            snapshot_dir: snapshot_dir.to_path_buf(),
            profile,
            tokenizer,
            metadata,
            return_full_text: options.return_full_text,
            model: Mutex::new(model),
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| GenerationError::Failed(format!("tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| GenerationError::Failed(format!("detokenization failed: {}", e)))
    }

    /// Cap the new-token budget at the model's context window
    fn token_budget(&self, prompt_len: usize, requested: usize) -> usize {
        match self.metadata.max_position_embeddings {
            Some(limit) if prompt_len + requested > limit => {
                let budget = limit.saturating_sub(prompt_len);
                tracing::warn!(
                    requested,
                    budget,
                    context = limit,
                    "max_new_tokens exceeds context window, truncating"
                );
                budget
            }
            _ => requested,
        }
    }
}

fn sampling_for(params: &SamplingParams) -> Sampling {
    if !params.do_sample || params.temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    match params.top_p {
        Some(p) => Sampling::TopP {
            p,
            temperature: params.temperature,
        },
        None => Sampling::All {
            temperature: params.temperature,
        },
    }
}

/// Reduce model output to the logits of the last position
fn last_logits(logits: Tensor) -> Result<Tensor, GenerationError> {
    let logits = match logits.rank() {
        // [vocab]
        1 => logits,
        // [batch, vocab]
        2 => logits.i(0)?,
        // [batch, seq, vocab]
        3 => {
            let seq_len = logits.dim(1)?;
            logits.i((0, seq_len.saturating_sub(1)))?
        }
        rank => {
            return Err(GenerationError::Failed(format!(
                "unexpected logits rank {} with dims {:?}",
                rank,
                logits.dims()
            )));
        }
    };
    Ok(logits.to_dtype(DType::F32)?)
}

/// Text that `full` adds after `prefix`, tolerating detokenizer differences
fn continuation(prefix: &str, full: &str) -> String {
    if let Some(rest) = full.strip_prefix(prefix) {
        return rest.to_string();
    }
    let common = prefix
        .chars()
        .zip(full.chars())
        .take_while(|(a, b)| a == b)
        .count();
    full.chars().skip(common).collect()
}

impl TextGenerator for CandleGenerator {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError> {
        let prompt_ids = self.encode(prompt)?;
        if prompt_ids.is_empty() {
            return Err(GenerationError::Failed(
                "prompt produced no tokens".to_string(),
            ));
        }

        let budget = self.token_budget(prompt_ids.len(), params.max_new_tokens);
        let mut processor = LogitsProcessor::from_sampling(params.seed, sampling_for(params));

        // begin() resets decoding state, so a lock left by a panicked call is reusable
        let mut model = lock_model(&self.model);
        let mut state = model.begin(&self.profile)?;

        let mut tokens = prompt_ids.clone();
        let mut generated = 0usize;

        for step in 0..budget {
            // Prefill the whole prompt once, then feed one token at a time
            let (context, offset) = if step == 0 {
                (&tokens[..], 0)
            } else {
                (&tokens[tokens.len() - 1..], tokens.len() - 1)
            };

            let input = Tensor::new(context, &self.profile.device)?.unsqueeze(0)?;
            let logits = last_logits(state.forward(&input, offset)?)?;
            let next = processor.sample(&logits)?;

            if self.metadata.eos_token_ids.contains(&next) {
                break;
            }

            tokens.push(next);
            generated += 1;
        }
        drop(state);
        drop(model);

        let full = self.decode(&tokens)?;
        let prompt_text = self.decode(&prompt_ids)?;
        let new_text = continuation(&prompt_text, &full);

        let generated_text = if self.return_full_text {
            format!("{}{}", prompt, new_text)
        } else {
            new_text
        };

        Ok(vec![GeneratedText {
            generated_text,
            tokens_generated: generated,
        }])
    }

    fn describe(&self) -> String {
        format!(
            "{} ({:?}) from {}",
            self.metadata.model_type,
            self.profile.kind,
            self.snapshot_dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_exact_prefix() {
        assert_eq!(continuation("Hi", "Hi there"), " there");
        assert_eq!(continuation("", "abc"), "abc");
    }

    #[test]
    fn test_continuation_divergent_prefix() {
        assert_eq!(continuation("Hi  ", "Hi there"), "there");
    }

    #[test]
    fn test_sampling_for() {
        let mut params = SamplingParams {
            max_new_tokens: 8,
            do_sample: true,
            temperature: 0.7,
            top_p: None,
            seed: 1,
        };
        assert!(matches!(sampling_for(&params), Sampling::All { temperature } if temperature == 0.7));

        params.top_p = Some(0.9);
        assert!(matches!(sampling_for(&params), Sampling::TopP { p, .. } if p == 0.9));

        params.do_sample = false;
        assert!(matches!(sampling_for(&params), Sampling::ArgMax));
    }

    #[test]
    fn test_last_logits_ranks() {
        let device = candle_core::Device::Cpu;
        let flat = Tensor::new(&[1f32, 2., 3.], &device).unwrap();
        assert_eq!(last_logits(flat.clone()).unwrap().dims(), &[3]);

        let batched = flat.unsqueeze(0).unwrap();
        assert_eq!(last_logits(batched.clone()).unwrap().dims(), &[3]);

        let seq = Tensor::new(&[[[0f32, 0., 0.], [1., 2., 3.]]], &device).unwrap();
        let last = last_logits(seq).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(last, vec![1., 2., 3.]);
    }

    const EOS: u32 = 2;
    const THERE: u32 = 4;

    /// Write a two-layer llama with constant weights whose argmax is always `favored`
    fn write_tiny_llama(dir: &Path, favored: u32, max_position_embeddings: usize) {
        let (vocab, hidden, intermediate, layers) = (8usize, 8usize, 16usize, 2usize);

        std::fs::write(
            dir.join("config.json"),
            serde_json::json!({
                "model_type": "llama",
                "hidden_size": hidden,
                "intermediate_size": intermediate,
                "vocab_size": vocab,
                "num_hidden_layers": layers,
                "num_attention_heads": 2,
                "num_key_value_heads": 2,
                "rms_norm_eps": 1e-5,
                "rope_theta": 10000.0,
                "bos_token_id": 1,
                "eos_token_id": EOS,
                "max_position_embeddings": max_position_embeddings,
                "tie_word_embeddings": false
            })
            .to_string(),
        )
        .unwrap();

        std::fs::write(
            dir.join("tokenizer.json"),
            serde_json::json!({
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {"type": "Whitespace"},
                "post_processor": null,
                "decoder": null,
                "model": {
                    "type": "WordLevel",
                    "vocab": {
                        "<unk>": 0, "<s>": 1, "</s>": 2, "hello": 3,
                        "there": 4, "world": 5, "a": 6, "b": 7
                    },
                    "unk_token": "<unk>"
                }
            })
            .to_string(),
        )
        .unwrap();

        // Attention and MLP are zero, so the hidden state stays the all-ones
        // embedding and only the favored lm_head row scores above zero.
        let device = candle_core::Device::Cpu;
        let zeros = |shape: &[usize]| Tensor::zeros(shape, DType::F32, &device).unwrap();
        let ones = |shape: &[usize]| Tensor::ones(shape, DType::F32, &device).unwrap();

        let mut tensors = std::collections::HashMap::new();
        tensors.insert("model.embed_tokens.weight".to_string(), ones(&[vocab, hidden]));
        tensors.insert("model.norm.weight".to_string(), ones(&[hidden]));
        let mut head = vec![0f32; vocab * hidden];
        head[favored as usize * hidden..(favored as usize + 1) * hidden].fill(1.0);
        tensors.insert(
            "lm_head.weight".to_string(),
            Tensor::from_vec(head, (vocab, hidden), &device).unwrap(),
        );

        for i in 0..layers {
            let p = format!("model.layers.{i}");
            for proj in ["q_proj", "k_proj", "v_proj", "o_proj"] {
                tensors.insert(format!("{p}.self_attn.{proj}.weight"), zeros(&[hidden, hidden]));
            }
            tensors.insert(format!("{p}.mlp.gate_proj.weight"), zeros(&[intermediate, hidden]));
            tensors.insert(format!("{p}.mlp.up_proj.weight"), zeros(&[intermediate, hidden]));
            tensors.insert(format!("{p}.mlp.down_proj.weight"), zeros(&[hidden, intermediate]));
            tensors.insert(format!("{p}.input_layernorm.weight"), ones(&[hidden]));
            tensors.insert(format!("{p}.post_attention_layernorm.weight"), ones(&[hidden]));
        }

        candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();
    }

    fn load_tiny(dir: &Path, return_full_text: bool) -> CandleGenerator {
        let options = LoadOptions {
            precision: Precision::Auto,
            return_full_text,
        };
        CandleGenerator::load(dir, DeviceProfile::cpu(), &options).unwrap()
    }

    fn greedy(max_new_tokens: usize) -> SamplingParams {
        SamplingParams {
            max_new_tokens,
            do_sample: false,
            temperature: 1.0,
            top_p: None,
            seed: 0,
        }
    }

    #[test]
    fn test_generate_decodes_requested_tokens() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_tiny_llama(temp_dir.path(), THERE, 64);
        let generator = load_tiny(temp_dir.path(), true);

        let out = generator.generate("hello world", &greedy(3)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tokens_generated, 3);
        assert_eq!(out[0].generated_text, "hello world there there there");

        // A second call starts from a fresh cache
        let again = generator.generate("hello world", &greedy(3)).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn test_generate_continuation_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_tiny_llama(temp_dir.path(), THERE, 64);
        let generator = load_tiny(temp_dir.path(), false);

        let out = generator.generate("hello", &greedy(2)).unwrap();
        assert_eq!(out[0].generated_text, " there there");
    }

    #[test]
    fn test_generate_stops_on_eos() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_tiny_llama(temp_dir.path(), EOS, 64);
        let generator = load_tiny(temp_dir.path(), true);

        let out = generator.generate("hello world", &greedy(10)).unwrap();
        assert_eq!(out[0].tokens_generated, 0);
        assert_eq!(out[0].generated_text, "hello world");
    }

    #[test]
    fn test_generate_truncates_to_context_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_tiny_llama(temp_dir.path(), THERE, 4);
        let generator = load_tiny(temp_dir.path(), true);

        assert_eq!(generator.token_budget(2, 10), 2);
        let out = generator.generate("hello world", &greedy(10)).unwrap();
        assert_eq!(out[0].tokens_generated, 2);
        assert_eq!(out[0].generated_text, "hello world there there");
    }

    #[test]
    fn test_load_requires_tokenizer() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("config.json"),
            r#"{"model_type": "gpt_bigcode"}"#,
        )
        .unwrap();

        let options = LoadOptions {
            precision: Precision::Auto,
            return_full_text: true,
        };
        let result = CandleGenerator::load(temp_dir.path(), DeviceProfile::cpu(), &options);
        assert!(matches!(result, Err(LoadError::Tokenizer(_))));
    }
}
