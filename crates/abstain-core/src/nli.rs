// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — NLI Backend Interface
// ─────────────────────────────────────────────────────────────────────
//! NLI (Natural Language Inference) backend trait, joint pair encoding,
//! and reference backends.
//!
//! In production the real cross-encoder (DeBERTa, RoBERTa-MNLI, ...)
//! runs behind this trait, either embedded or through the PyO3 layer
//! where the tokenizer and model live in Python. `HeuristicNli`
//! provides deterministic scoring for tests and benchmarks.

use std::collections::HashSet;

use abstain_types::{AbstainError, AbstainResult, Pair};

/// Special-token layout for a jointly encoded (premise, hypothesis) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairTemplate {
    pub prefix: Vec<u32>,
    pub separator: Vec<u32>,
    pub suffix: Vec<u32>,
    pub pad_id: u32,
}

impl PairTemplate {
    /// `[CLS] premise [SEP] hypothesis [SEP]` (BERT, DeBERTa).
    pub fn bert(cls_id: u32, sep_id: u32, pad_id: u32) -> Self {
        Self {
            prefix: vec![cls_id],
            separator: vec![sep_id],
            suffix: vec![sep_id],
            pad_id,
        }
    }

    /// `<s> premise </s></s> hypothesis </s>` (RoBERTa, BART).
    pub fn roberta(bos_id: u32, eos_id: u32, pad_id: u32) -> Self {
        Self {
            prefix: vec![bos_id],
            separator: vec![eos_id, eos_id],
            suffix: vec![eos_id],
            pad_id,
        }
    }

    /// Tokens added around the two segments.
    pub fn special_tokens(&self) -> usize {
        self.prefix.len() + self.separator.len() + self.suffix.len()
    }

    pub fn assemble(&self, premise: &[u32], hypothesis: &[u32]) -> Vec<u32> {
        let mut ids =
            Vec::with_capacity(self.special_tokens() + premise.len() + hypothesis.len());
        ids.extend_from_slice(&self.prefix);
        ids.extend_from_slice(premise);
        ids.extend_from_slice(&self.separator);
        ids.extend_from_slice(hypothesis);
        ids.extend_from_slice(&self.suffix);
        ids
    }
}

/// Trim the longer segment one token at a time until both fit in
/// `budget` tokens. Ties trim the hypothesis.
///
/// Returns true if anything was removed.
pub fn truncate_longest_first(
    premise: &mut Vec<u32>,
    hypothesis: &mut Vec<u32>,
    budget: usize,
) -> bool {
    let mut truncated = false;
    while premise.len() + hypothesis.len() > budget {
        if premise.len() > hypothesis.len() {
            premise.pop();
        } else {
            hypothesis.pop();
        }
        truncated = true;
    }
    truncated
}

/// Padded model input for one batch.
///
/// Rows are padded to the longest encoding in the batch. `lengths`
/// holds the unpadded token count of each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    input_ids: Vec<Vec<u32>>,
    attention_mask: Vec<Vec<u8>>,
    lengths: Vec<usize>,
    truncated: Vec<bool>,
    pad_id: u32,
}

impl EncodedBatch {
    /// Pad `sequences` to a common length.
    ///
    /// `truncated` must have one flag per sequence; missing flags read
    /// as false.
    pub fn from_sequences(sequences: Vec<Vec<u32>>, truncated: Vec<bool>, pad_id: u32) -> Self {
        let lengths: Vec<usize> = sequences.iter().map(Vec::len).collect();
        let padded_len = lengths.iter().copied().max().unwrap_or(0);
        let attention_mask = lengths
            .iter()
            .map(|&len| {
                let mut mask = vec![1u8; len];
                mask.resize(padded_len, 0);
                mask
            })
            .collect();
        let input_ids = sequences
            .into_iter()
            .map(|mut ids| {
                ids.resize(padded_len, pad_id);
                ids
            })
            .collect();
        let mut truncated = truncated;
        truncated.resize(lengths.len(), false);
        Self {
            input_ids,
            attention_mask,
            lengths,
            truncated,
            pad_id,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Width of every row after padding.
    pub fn padded_len(&self) -> usize {
        self.input_ids.first().map_or(0, Vec::len)
    }

    pub fn input_ids(&self) -> &[Vec<u32>] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[Vec<u8>] {
        &self.attention_mask
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn truncated(&self) -> &[bool] {
        &self.truncated
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// Unpadded token ids of row `i`.
    pub fn row(&self, i: usize) -> &[u32] {
        &self.input_ids[i][..self.lengths[i]]
    }

    /// Keep only rows where `keep[i]` is true, re-padding to the new
    /// longest row.
    pub fn retain_rows(&self, keep: &[bool]) -> Self {
        let mut sequences = Vec::new();
        let mut truncated = Vec::new();
        for i in 0..self.len() {
            if keep.get(i).copied().unwrap_or(false) {
                sequences.push(self.row(i).to_vec());
                truncated.push(self.truncated[i]);
            }
        }
        Self::from_sequences(sequences, truncated, self.pad_id)
    }
}

/// Trait for NLI backends: a tokenizer plus a sequence-classification
/// model treated as a read-only black box.
///
/// Implementations are shared across concurrent requests behind an
/// `Arc`, so `infer` must not mutate model state.
pub trait NliBackend: Send + Sync {
    /// Width of the logit vector (3 for entailment/neutral/contradiction).
    fn num_labels(&self) -> usize;

    /// Special-token layout used by [`encode`](Self::encode).
    fn template(&self) -> &PairTemplate;

    /// Tokenize raw texts without special tokens, one id list per text.
    fn tokenize(&self, texts: &[&str]) -> AbstainResult<Vec<Vec<u32>>>;

    /// Run the model over an encoded batch; one logit row per input row,
    /// same order.
    fn infer(&self, input: &EncodedBatch) -> AbstainResult<Vec<Vec<f32>>>;

    /// Jointly encode pairs, padded to the longest.
    ///
    /// With `truncate`, each encoding is cut longest-first to
    /// `max_length`; without it, full lengths are returned and the
    /// caller decides what to do with overlong rows.
    fn encode(
        &self,
        pairs: &[Pair],
        max_length: usize,
        truncate: bool,
    ) -> AbstainResult<EncodedBatch> {
        let texts: Vec<&str> = pairs
            .iter()
            .flat_map(|p| [p.context.as_str(), p.claim.as_str()])
            .collect();
        let tokens = self.tokenize(&texts)?;
        if tokens.len() != texts.len() {
            return Err(AbstainError::ModelInference(format!(
                "tokenizer returned {} encodings for {} texts",
                tokens.len(),
                texts.len()
            )));
        }

        let template = self.template();
        let budget = max_length.saturating_sub(template.special_tokens());
        let mut sequences = Vec::with_capacity(pairs.len());
        let mut flags = Vec::with_capacity(pairs.len());
        let mut segments = tokens.into_iter();
        while let (Some(mut premise), Some(mut hypothesis)) = (segments.next(), segments.next()) {
            let cut = truncate && truncate_longest_first(&mut premise, &mut hypothesis, budget);
            sequences.push(template.assemble(&premise, &hypothesis));
            flags.push(cut);
        }
        Ok(EncodedBatch::from_sequences(sequences, flags, template.pad_id))
    }
}

/// Numerically stable softmax. `None` if any logit is non-finite.
pub fn softmax(logits: &[f32]) -> Option<Vec<f64>> {
    if logits.is_empty() || logits.iter().any(|l| !l.is_finite()) {
        return None;
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    Some(exps.into_iter().map(|e| e / sum).collect())
}

// ── Heuristic backend ───────────────────────────────────────────────

const HEURISTIC_VOCAB: u32 = 30_000;
const HEURISTIC_FIRST_WORD_ID: u32 = 3;
const NEGATIONS: [&str; 6] = ["not", "no", "never", "none", "nobody", "nothing"];

/// Deterministic lexical NLI scorer (no model required).
///
/// Label order is `[contradiction, entailment, neutral]`. Contradiction
/// rises with low lexical overlap and with a negation present on only
/// one side.
pub struct HeuristicNli {
    template: PairTemplate,
}

impl HeuristicNli {
    pub const CONTRADICTION: usize = 0;
    pub const ENTAILMENT: usize = 1;
    pub const NEUTRAL: usize = 2;

    pub fn new() -> Self {
        Self {
            template: PairTemplate::bert(1, 2, 0),
        }
    }

    /// FNV-1a hash of a normalized word folded into the vocabulary.
    fn word_id(word: &str) -> u32 {
        let mut hash: u32 = 0x811c_9dc5;
        for b in word.bytes() {
            hash ^= b as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        HEURISTIC_FIRST_WORD_ID + hash % (HEURISTIC_VOCAB - HEURISTIC_FIRST_WORD_ID)
    }

    fn words(text: &str) -> Vec<u32> {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .map(|w| Self::word_id(&w))
            .collect()
    }

    /// Split an assembled row back into (premise, hypothesis) ids.
    fn segments<'r>(&self, row: &'r [u32]) -> (&'r [u32], &'r [u32]) {
        let body = &row[self.template.prefix.len().min(row.len())..];
        let sep = self.template.separator[0];
        match body.iter().position(|&id| id == sep) {
            Some(split) => {
                let hyp = &body[split + self.template.separator.len()..];
                let hyp = hyp.strip_suffix(self.template.suffix.as_slice()).unwrap_or(hyp);
                (&body[..split], hyp)
            }
            None => (body, &[]),
        }
    }

    fn logits(&self, row: &[u32], negations: &HashSet<u32>) -> Vec<f32> {
        let (premise, hypothesis) = self.segments(row);
        let p: HashSet<u32> = premise.iter().copied().collect();
        let h: HashSet<u32> = hypothesis.iter().copied().collect();
        let overlap = if h.is_empty() {
            0.0
        } else {
            p.intersection(&h).count() as f32 / h.len() as f32
        };
        let negated_p = p.iter().any(|id| negations.contains(id));
        let negated_h = h.iter().any(|id| negations.contains(id));
        let polarity = if negated_p != negated_h { 3.0 } else { 0.0 };

        let mut logits = vec![0.0f32; 3];
        logits[Self::CONTRADICTION] = 2.0 * (1.0 - overlap) - 1.0 + polarity;
        logits[Self::ENTAILMENT] = 4.0 * overlap - 2.0 - polarity;
        logits[Self::NEUTRAL] = 0.0;
        logits
    }
}

impl Default for HeuristicNli {
    fn default() -> Self {
        Self::new()
    }
}

impl NliBackend for HeuristicNli {
    fn num_labels(&self) -> usize {
        3
    }

    fn template(&self) -> &PairTemplate {
        &self.template
    }

    fn tokenize(&self, texts: &[&str]) -> AbstainResult<Vec<Vec<u32>>> {
        Ok(texts.iter().map(|t| Self::words(t)).collect())
    }

    fn infer(&self, input: &EncodedBatch) -> AbstainResult<Vec<Vec<f32>>> {
        let negations: HashSet<u32> = NEGATIONS.iter().map(|w| Self::word_id(w)).collect();
        Ok((0..input.len())
            .map(|i| self.logits(input.row(i), &negations))
            .collect())
    }
}

// ── External backend ────────────────────────────────────────────────

type TokenizeFn = Box<dyn Fn(&[&str]) -> Result<Vec<Vec<u32>>, String> + Send + Sync>;
type InferFn = Box<dyn Fn(&EncodedBatch) -> Result<Vec<Vec<f32>>, String> + Send + Sync>;

/// External NLI backend that calls tokenizer and model function pointers.
///
/// Used by the PyO3 FFI layer to delegate tokenization and inference to
/// Python (where the Hugging Face model lives) while padding,
/// truncation, budgeting, and decisions stay in Rust.
pub struct ExternalNli {
    num_labels: usize,
    template: PairTemplate,
    tokenize_fn: TokenizeFn,
    infer_fn: InferFn,
}

impl ExternalNli {
    pub fn new(
        num_labels: usize,
        template: PairTemplate,
        tokenize_fn: impl Fn(&[&str]) -> Result<Vec<Vec<u32>>, String> + Send + Sync + 'static,
        infer_fn: impl Fn(&EncodedBatch) -> Result<Vec<Vec<f32>>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            num_labels,
            template,
            tokenize_fn: Box::new(tokenize_fn),
            infer_fn: Box::new(infer_fn),
        }
    }
}

impl NliBackend for ExternalNli {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn template(&self) -> &PairTemplate {
        &self.template
    }

    fn tokenize(&self, texts: &[&str]) -> AbstainResult<Vec<Vec<u32>>> {
        (self.tokenize_fn)(texts).map_err(AbstainError::ModelInference)
    }

    fn infer(&self, input: &EncodedBatch) -> AbstainResult<Vec<Vec<f32>>> {
        (self.infer_fn)(input).map_err(AbstainError::ModelInference)
    }
}
