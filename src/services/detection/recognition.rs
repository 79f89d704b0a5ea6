// Recognition dictionary and CTC decoding

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Symbol table of a recognition model.
///
/// Index 0 is the CTC blank; dictionary line `n` is class `n + 1`; a trailing
/// space class closes the table.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: Vec<String>,
}

impl Vocabulary {
    pub const BLANK: usize = 0;

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionary {}", path.display()))?;
        let vocab = Self::parse(&content);
        debug!("Loaded {} symbols from {}", vocab.len(), path.display());
        Ok(vocab)
    }

    pub fn parse(content: &str) -> Self {
        let mut symbols = Vec::with_capacity(content.lines().count() + 2);
        symbols.push(String::new());
        symbols.extend(
            content
                .lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        symbols.push(" ".to_string());
        Self { symbols }
    }

    /// Number of classes, blank included
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.len() <= 2
    }

    pub fn symbol(&self, index: usize) -> Option<&str> {
        if index == Self::BLANK {
            return None;
        }
        self.symbols.get(index).map(String::as_str)
    }
}

/// Greedy CTC decode of `[seq_len, classes]` logits.
///
/// Takes the best class per timestep, collapses repeats and drops blanks.
/// Returns the text and the mean probability of the emitted symbols.
pub fn ctc_greedy_decode(
    logits: &[f32],
    seq_len: usize,
    classes: usize,
    vocab: &Vocabulary,
) -> (String, f32) {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut prev_idx: Option<usize> = None;

    for t in 0..seq_len {
        let offset = t * classes;
        let Some(step) = logits.get(offset..offset + classes) else {
            break;
        };

        let (best_idx, best_val) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });

        if best_idx != Vocabulary::BLANK && Some(best_idx) != prev_idx {
            if let Some(symbol) = vocab.symbol(best_idx) {
                text.push_str(symbol);
                confidences.push(best_val.clamp(0.0, 1.0));
            }
        }

        prev_idx = Some(best_idx);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    (text.trim().to_string(), confidence)
}
